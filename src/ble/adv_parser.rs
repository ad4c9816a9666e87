//! Advertisement payload parsing - AD-structure walking to pull the
//! Local Name and the advertised service UUID lists out of scan data.

use heapless::{String, Vec};

use crate::ble::Uuid;
use crate::config::MAX_ADVERTISED_UUIDS;

const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;
const AD_SHORTENED_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;

/// Extract the local name from raw advertisement data.
///
/// A Complete Local Name (0x09) wins over a Shortened one (0x08);
/// returns `None` when neither is present.  Names longer than the
/// sighting capacity are truncated.
pub fn local_name(data: &[u8]) -> Option<String<32>> {
    let mut shortened: Option<String<32>> = None;

    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == AD_COMPLETE_NAME || ad_type == AD_SHORTENED_NAME {
            let name_bytes = &data[i + 2..i + 1 + len];
            let mut name = String::new();
            if let Ok(text) = core::str::from_utf8(name_bytes) {
                for c in text.chars() {
                    if name.push(c).is_err() {
                        break;
                    }
                }
            }
            if !name.is_empty() {
                if ad_type == AD_COMPLETE_NAME {
                    return Some(name);
                }
                shortened = Some(name);
            }
        }
        i += len + 1;
    }

    shortened
}

/// Collect the service UUIDs listed in raw advertisement data.
///
/// Walks the 16-bit (0x02/0x03) and 128-bit (0x06/0x07) service list
/// structures.  Entries are little-endian on the wire and stored
/// big-endian here; duplicates collapse.  Anything past
/// [`MAX_ADVERTISED_UUIDS`] is dropped.
pub fn service_uuids(data: &[u8]) -> Vec<Uuid, MAX_ADVERTISED_UUIDS> {
    let mut out: Vec<Uuid, MAX_ADVERTISED_UUIDS> = Vec::new();

    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        let payload = &data[i + 2..i + 1 + len];
        match ad_type {
            AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => {
                for pair in payload.chunks_exact(2) {
                    push_unique(&mut out, Uuid::Short(u16::from_le_bytes([pair[0], pair[1]])));
                }
            }
            AD_UUID128_INCOMPLETE | AD_UUID128_COMPLETE => {
                for entry in payload.chunks_exact(16) {
                    let mut bytes = [0u8; 16];
                    for (dst, src) in bytes.iter_mut().zip(entry.iter().rev()) {
                        *dst = *src;
                    }
                    push_unique(&mut out, Uuid::Long(bytes));
                }
            }
            _ => {}
        }
        i += len + 1;
    }

    out
}

fn push_unique(out: &mut Vec<Uuid, MAX_ADVERTISED_UUIDS>, uuid: Uuid) {
    if !out.iter().any(|u| *u == uuid) {
        let _ = out.push(uuid);
    }
}
