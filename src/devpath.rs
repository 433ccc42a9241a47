use uuid::Uuid;

use oracle_api::error::{OracleError, OracleResult};
use sysdefs::devpath::{
    ITEM_HEADER_LEN, MAX_PATH_ITEMS, SUBTYPE_ACPI_HID, SUBTYPE_END_ENTIRE,
    SUBTYPE_HARDWARE_PCI, SUBTYPE_MEDIA_FILE_PATH, SUBTYPE_MEDIA_HARDDRIVE, TYPE_ACPI, TYPE_END,
    TYPE_HARDWARE, TYPE_MEDIA,
};

use crate::buffer::Reader;

#[derive(Debug, Clone)]
pub struct DevicePathItem {
    pub item_type: u8,
    pub subtype: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct DevicePath {
    pub items: Vec<DevicePathItem>,
}

impl DevicePath {
    /// Parses an `EFI_DEVICE_PATH_PROTOCOL` byte stream up to its terminator
    /// item (type=0x7F). Each item's on-disk `len` field includes its own
    /// 4-byte header, so the payload read is `len - 4` bytes.
    pub fn parse(data: &[u8]) -> OracleResult<Self> {
        let mut r = Reader::new(data);
        let mut items = Vec::new();

        loop {
            if items.len() >= MAX_PATH_ITEMS {
                return Err(OracleError::MalformedLog(
                    "device path exceeds maximum item count".into(),
                ));
            }
            let item_type = r.get_u8()?;
            let subtype = r.get_u8()?;
            let len = r.get_u16le()? as usize;
            if len < ITEM_HEADER_LEN {
                return Err(OracleError::MalformedLog(
                    "device path item length smaller than its header".into(),
                ));
            }
            let payload_len = len - ITEM_HEADER_LEN;
            let payload = r.get(payload_len)?.to_vec();

            if item_type == TYPE_END && subtype == SUBTYPE_END_ENTIRE {
                break;
            }
            items.push(DevicePathItem {
                item_type,
                subtype,
                data: payload,
            });
            if r.eof() {
                break;
            }
        }

        Ok(DevicePath { items })
    }

    pub fn harddisk_partition_uuid(&self) -> Option<Uuid> {
        self.items.iter().find_map(|item| {
            if item.item_type == TYPE_MEDIA
                && item.subtype == SUBTYPE_MEDIA_HARDDRIVE
                && item.data.len() >= 36
            {
                Uuid::from_slice(&item.data[20..36]).ok()
            } else {
                None
            }
        })
    }

    pub fn file_path(&self) -> Option<String> {
        self.items.iter().find_map(|item| {
            if item.item_type == TYPE_MEDIA && item.subtype == SUBTYPE_MEDIA_FILE_PATH {
                Some(decode_device_path_string(&item.data).replace('\\', "/"))
            } else {
                None
            }
        })
    }

    pub fn pnp_hid(&self) -> Option<u32> {
        self.items.iter().find_map(|item| {
            if item.item_type == TYPE_ACPI && item.subtype == SUBTYPE_ACPI_HID && item.data.len() >= 4
            {
                let hid = u32::from_le_bytes([item.data[0], item.data[1], item.data[2], item.data[3]]);
                if (hid & 0xFFFF) == 0x41d0 {
                    Some(hid)
                } else {
                    None
                }
            } else {
                None
            }
        })
    }

    /// Returns `(device, function)` for the first PCI device-path item. The
    /// on-disk byte order is `(function, device)` — this accessor un-swaps
    /// it to match how callers name the pair.
    pub fn pci_coords(&self) -> Option<(u8, u8)> {
        self.items.iter().find_map(|item| {
            if item.item_type == TYPE_HARDWARE
                && item.subtype == SUBTYPE_HARDWARE_PCI
                && item.data.len() >= 2
            {
                let function = item.data[0];
                let device = item.data[1];
                Some((device, function))
            } else {
                None
            }
        })
    }
}

fn decode_device_path_string(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_item() -> Vec<u8> {
        vec![TYPE_END, SUBTYPE_END_ENTIRE, 0x04, 0x00]
    }

    #[test]
    fn decodes_file_path_item() {
        // "\EFI\BOOT" in UTF-16LE, NUL terminated
        let name: Vec<u8> = "\\EFI\\BOOT\0"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let len = (4 + name.len()) as u16;

        let mut bytes = Vec::new();
        bytes.push(TYPE_MEDIA);
        bytes.push(SUBTYPE_MEDIA_FILE_PATH);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&end_item());

        let path = DevicePath::parse(&bytes).unwrap();
        assert_eq!(path.file_path().unwrap(), "/EFI/BOOT");
    }

    #[test]
    fn decodes_pci_coords_with_byte_swap() {
        let mut bytes = vec![TYPE_HARDWARE, SUBTYPE_HARDWARE_PCI, 0x06, 0x00, 0x02, 0x00];
        bytes.extend_from_slice(&end_item());

        let path = DevicePath::parse(&bytes).unwrap();
        assert_eq!(path.pci_coords(), Some((0, 2)));
    }

    #[test]
    fn decodes_harddisk_partition_uuid() {
        let uuid = Uuid::new_v4();
        let mut payload = vec![0u8; 20];
        payload.extend_from_slice(uuid.as_bytes());
        payload.extend_from_slice(&[0u8; 20]);
        let len = (4 + payload.len()) as u16;

        let mut bytes = vec![TYPE_MEDIA, SUBTYPE_MEDIA_HARDDRIVE];
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&end_item());

        let path = DevicePath::parse(&bytes).unwrap();
        assert_eq!(path.harddisk_partition_uuid(), Some(uuid));
    }

    #[test]
    fn rejects_item_shorter_than_its_own_header() {
        let bytes = vec![TYPE_MEDIA, SUBTYPE_MEDIA_FILE_PATH, 0x02, 0x00];
        assert!(DevicePath::parse(&bytes).is_err());
    }
}
