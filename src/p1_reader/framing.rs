use log::debug;

use super::structs::{DataFormat, FixedBuffer};
use super::P1Error;
use crate::checksum::{crc16_ascii, crc16_x25, parse_ascii_checksum, parse_binary_checksum};

/// Binary frames carry their DLMS payload after the HDLC header and HCS.
pub const DLMS_PAYLOAD_OFFSET: usize = 9;

const SEGMENTATION_BIT: u8 = 0x08;
const FRAME_FORMAT_MASK: u8 = 0xe0;
const FRAME_FORMAT_TYPE_3: u8 = 0xa0;
const FLAG: u8 = 0x7e;

#[derive(Debug, PartialEq)]
pub enum FrameStatus {
    Incomplete,
    Complete,
}

/// Look at the last byte of `message` and decide whether the frame is done.
/// `crc_position` is set as soon as the checksum location is known.
pub fn track_frame(format: DataFormat, message: &[u8], crc_position: &mut usize) -> Result<FrameStatus, P1Error> {
    let position = message.len();
    let byte = match message.last() {
        Some(b) => *b,
        None => return Ok(FrameStatus::Incomplete),
    };

    match format {
        DataFormat::Ascii => {
            if byte == b'!' {
                *crc_position = position;
            }
        }
        DataFormat::Binary => {
            if position == 3 {
                if message[1] & FRAME_FORMAT_MASK != FRAME_FORMAT_TYPE_3 {
                    return Err(P1Error::UnknownFrameFormat(message[1]));
                }
                let frame_length = (((message[1] & 0x07) as usize) << 8) | message[2] as usize;
                if frame_length < 2 {
                    return Err(P1Error::FrameTooShort(frame_length));
                }
                *crc_position = frame_length - 1;
                debug!("Frame size: {}", frame_length);
            }
        }
    }

    if *crc_position > 0 && position > *crc_position {
        match format {
            DataFormat::Ascii => {
                if byte == b'\n' {
                    return Ok(FrameStatus::Complete);
                }
            }
            DataFormat::Binary => {
                if position == *crc_position + 3 {
                    if byte != FLAG {
                        return Err(P1Error::UnexpectedEnd(byte));
                    }
                    return Ok(FrameStatus::Complete);
                }
            }
        }
    }
    Ok(FrameStatus::Incomplete)
}

/// Compare the transmitted checksum with the calculated one.
pub fn verify_checksum(format: DataFormat, message: &[u8], crc_position: usize) -> Result<u16, P1Error> {
    let (calculated, received) = match format {
        DataFormat::Ascii => (
            crc16_ascii(&message[..crc_position]),
            parse_ascii_checksum(&message[crc_position..]),
        ),
        DataFormat::Binary => (
            crc16_x25(&message[1..crc_position]),
            parse_binary_checksum(&message[crc_position..]),
        ),
    };

    match received {
        None => Err(P1Error::MissingChecksum),
        Some(received) if received != calculated => Err(P1Error::ChecksumMismatch { calculated, received }),
        Some(_) => Ok(calculated),
    }
}

/// Segmented frames are followed by more frames of the same telegram.
pub fn is_segmented(message: &[u8]) -> bool {
    message.get(1).map(|b| b & SEGMENTATION_BIT != 0).unwrap_or(false)
}

/// Append the information field of a verified binary frame to `dlms`.
pub fn append_payload(message: &[u8], crc_position: usize, dlms: &mut FixedBuffer) -> Result<(), P1Error> {
    if crc_position <= DLMS_PAYLOAD_OFFSET {
        return Ok(());
    }
    if !dlms.try_extend(&message[DLMS_PAYLOAD_OFFSET..crc_position]) {
        return Err(P1Error::DlmsBufferOverrun);
    }
    Ok(())
}

/// Debug dump of a buffer, hex in lines of 40 bytes for binary data.
pub fn log_buffer(format: DataFormat, data: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match format {
        DataFormat::Ascii => debug!("{}", String::from_utf8_lossy(data)),
        DataFormat::Binary => {
            for chunk in data.chunks(40) {
                debug!("{}", hex::encode_upper(chunk));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(format: DataFormat, bytes: &[u8]) -> Result<(FrameStatus, usize, usize), P1Error> {
        let mut message = Vec::new();
        let mut crc_position = 0;
        for &b in bytes {
            message.push(b);
            if track_frame(format, &message, &mut crc_position)? == FrameStatus::Complete {
                return Ok((FrameStatus::Complete, message.len(), crc_position));
            }
        }
        Ok((FrameStatus::Incomplete, message.len(), crc_position))
    }

    #[test]
    fn test_ascii_frame_ends_after_checksum_line() {
        let telegram = b"/X\r\n1-0:1.8.1(1)\r\n!1A2B\r\nrest";
        let (status, len, crc_position) = feed(DataFormat::Ascii, telegram).unwrap();
        assert_eq!(status, FrameStatus::Complete);
        assert_eq!(len, telegram.len() - 4);
        assert_eq!(telegram[crc_position - 1], b'!');
    }

    #[test]
    fn test_ascii_newlines_before_bang_do_not_complete() {
        let (status, _, _) = feed(DataFormat::Ascii, b"/X\r\n\r\n1-0:1.8.1(1)\r\n").unwrap();
        assert_eq!(status, FrameStatus::Incomplete);
    }

    #[test]
    fn test_binary_frame_length() {
        // length 0x00b => checksum at 10, flag at 12
        let frame = [0x7e, 0xa0, 0x0b, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0x7e, 0xff];
        let (status, len, crc_position) = feed(DataFormat::Binary, &frame).unwrap();
        assert_eq!(status, FrameStatus::Complete);
        assert_eq!(crc_position, 10);
        assert_eq!(len, 13);
    }

    #[test]
    fn test_binary_rejects_unknown_format() {
        let result = feed(DataFormat::Binary, &[0x7e, 0x80, 0x10, 0x00]);
        assert_eq!(result.unwrap_err(), P1Error::UnknownFrameFormat(0x80));
    }

    #[test]
    fn test_binary_rejects_missing_closing_flag() {
        let frame = [0x7e, 0xa0, 0x05, 1, 2, 3, 0x00];
        let result = feed(DataFormat::Binary, &frame);
        assert_eq!(result.unwrap_err(), P1Error::UnexpectedEnd(0x00));
    }

    #[test]
    fn test_binary_rejects_tiny_length() {
        let result = feed(DataFormat::Binary, &[0x7e, 0xa0, 0x01]);
        assert_eq!(result.unwrap_err(), P1Error::FrameTooShort(1));
    }

    #[test]
    fn test_verify_ascii_checksum() {
        let mut telegram = b"/X\r\n1-0:1.8.1(1)\r\n!".to_vec();
        let crc_position = telegram.len();
        let crc = crc16_ascii(&telegram);
        telegram.extend(format!("{:04X}\r\n", crc).as_bytes());
        assert_eq!(verify_checksum(DataFormat::Ascii, &telegram, crc_position), Ok(crc));

        let mut broken = telegram.clone();
        broken[5] = b'2';
        assert!(matches!(
            verify_checksum(DataFormat::Ascii, &broken, crc_position),
            Err(P1Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_binary_checksum() {
        let mut frame = vec![0x7e, 0xa0, 0x0b, 1, 2, 3, 4, 5, 6, 7];
        let crc = crc16_x25(&frame[1..]);
        frame.extend(crc.to_le_bytes());
        frame.push(0x7e);
        assert_eq!(verify_checksum(DataFormat::Binary, &frame, 10), Ok(crc));
    }

    #[test]
    fn test_payload_and_segmentation() {
        let frame = [0x7e, 0xa8, 0x0d, 0, 0, 0, 0, 0, 0, 0xe6, 0xe7, 0xaa, 0xbb, 0x7e];
        assert!(is_segmented(&frame));
        let mut dlms = FixedBuffer::new(4);
        append_payload(&frame, 12, &mut dlms).unwrap();
        assert_eq!(dlms.as_slice(), &[0xe6, 0xe7, 0xaa]);
        assert_eq!(append_payload(&frame, 12, &mut dlms), Err(P1Error::DlmsBufferOverrun));
    }
}
