use crate::obis_utils::{export_tariff_slot, import_tariff_slot, OBIS_ACTIVE_TARIFF};

pub const TARIFF_SLOTS: usize = 4;

/// Import and export registers per tariff, used to work out which tariff is
/// active for meters that do not report it.
pub struct TariffCounters {
    import: [f64; TARIFF_SLOTS],
    export: [f64; TARIFF_SLOTS],
    import_previous: [f64; TARIFF_SLOTS],
    export_previous: [f64; TARIFF_SLOTS],
    use_computed: bool,
}

impl TariffCounters {
    pub fn new() -> Self {
        Self {
            import: [0.0; TARIFF_SLOTS],
            export: [0.0; TARIFF_SLOTS],
            import_previous: [0.0; TARIFF_SLOTS],
            export_previous: [0.0; TARIFF_SLOTS],
            use_computed: true,
        }
    }

    pub fn begin_telegram(&mut self) {
        self.use_computed = true;
    }

    pub fn disable_inference(&mut self) {
        self.use_computed = false;
    }

    pub fn inference_enabled(&self) -> bool {
        self.use_computed
    }

    /// Mirror a decoded value into the tariff registers.
    pub fn observe(&mut self, obis: u32, value: f64) {
        if obis == OBIS_ACTIVE_TARIFF {
            self.disable_inference();
        } else if let Some(slot) = import_tariff_slot(obis) {
            self.import[slot] = value;
        } else if let Some(slot) = export_tariff_slot(obis) {
            self.export[slot] = value;
        }
    }

    /// Compare against the previous cycle and roll the registers over.
    /// Returns the 1-based tariff that moved, unless the meter reported one.
    pub fn infer(&mut self) -> Option<u32> {
        let mut tariff = None;
        for i in 0..TARIFF_SLOTS {
            let import_moved = self.import_previous[i] != self.import[i] && self.import_previous[i] != 0.0;
            let export_moved = self.export_previous[i] != self.export[i] && self.export_previous[i] != 0.0;
            if import_moved || export_moved {
                tariff = Some(i as u32 + 1);
            }
            self.import_previous[i] = self.import[i];
            self.export_previous[i] = self.export[i];
        }
        if self.use_computed {
            tariff
        } else {
            None
        }
    }
}

impl Default for TariffCounters {
    fn default() -> Self {
        Self::new()
    }
}
