//! Event payload layout: `[4: name length N] [N: name] [structured payload]`.

use crate::MAX_PACKET_LEN;
use crate::cursor::Cursor;
use crate::errors::WireError;

const NAME_LEN_FIELD: usize = 4;

/// Borrowed view of an event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFrame<'a> {
    /// Event name, possibly empty.
    pub name: &'a [u8],
    /// Structured payload bytes for the codec.
    pub body: &'a [u8],
}

/// Splits an event payload into its name and structured body.
///
/// The declared name length is compared with the bytes that follow it
/// before anything is consumed.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] when the length field is incomplete and
/// [`WireError::EventNameOverrun`] when the name would run past the payload.
pub fn split_event(payload: &[u8]) -> Result<EventFrame<'_>, WireError> {
    let mut cursor = Cursor::new(payload);
    let declared = cursor.read_u32()?;
    let available = cursor.remaining_len();
    let name_len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= available)
        .ok_or(WireError::EventNameOverrun {
            declared,
            available,
        })?;
    let name = cursor.take(name_len)?;
    Ok(EventFrame {
        name,
        body: cursor.remaining(),
    })
}

/// Checks that the length field, the name and the decoded payload fit the
/// packet bound.
///
/// # Errors
///
/// Returns [`WireError::EventTooLarge`] when they do not.
pub fn check_event_size(name_len: usize, consumed: usize) -> Result<(), WireError> {
    let len = NAME_LEN_FIELD
        .saturating_add(name_len)
        .saturating_add(consumed);
    if len > MAX_PACKET_LEN {
        return Err(WireError::EventTooLarge { len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &[u8], body: &[u8]) -> Vec<u8> {
        let len = u32::try_from(name.len()).expect("name length fits");
        let mut out = len.to_be_bytes().to_vec();
        out.extend_from_slice(name);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn splits_name_and_body() {
        let bytes = event(b"orders", b"{\"a\":1}");
        let frame = split_event(&bytes).expect("valid event");
        assert_eq!(frame.name, b"orders");
        assert_eq!(frame.body, b"{\"a\":1}");
    }

    #[test]
    fn empty_name_is_allowed() {
        let bytes = event(b"", b"{}");
        let frame = split_event(&bytes).expect("valid event");
        assert!(frame.name.is_empty());
        assert_eq!(frame.body, b"{}");
    }

    #[test]
    fn overrunning_name_is_rejected() {
        let mut bytes = 100_u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        assert_eq!(
            split_event(&bytes),
            Err(WireError::EventNameOverrun {
                declared: 100,
                available: 5,
            })
        );
    }

    #[test]
    fn incomplete_length_field_is_truncated() {
        assert!(matches!(
            split_event(&[0, 1]),
            Err(WireError::Truncated { needed: 4, .. })
        ));
    }

    #[test]
    fn event_size_is_bounded_by_packet_limit() {
        assert!(check_event_size(10, MAX_PACKET_LEN - 14).is_ok());
        assert_eq!(
            check_event_size(10, MAX_PACKET_LEN - 13),
            Err(WireError::EventTooLarge {
                len: MAX_PACKET_LEN + 1
            })
        );
    }
}
