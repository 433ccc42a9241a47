/// `EFI_DEVICE_PATH_PROTOCOL` type/subtype constants (UEFI spec §10), limited
/// to the items this crate's device-path parser actually interprets.
pub const TYPE_HARDWARE: u8 = 0x01;
pub const SUBTYPE_HARDWARE_PCI: u8 = 0x01;

pub const TYPE_ACPI: u8 = 0x02;
pub const SUBTYPE_ACPI_HID: u8 = 0x01;

pub const TYPE_MEDIA: u8 = 0x04;
pub const SUBTYPE_MEDIA_HARDDRIVE: u8 = 0x01;
pub const SUBTYPE_MEDIA_FILE_PATH: u8 = 0x04;

pub const TYPE_END: u8 = 0x7f;
pub const SUBTYPE_END_ENTIRE: u8 = 0xff;

/// Every device-path item's on-disk `len` field includes its own 4-byte
/// header (type, subtype, 2-byte length).
pub const ITEM_HEADER_LEN: usize = 4;

/// Upper bound on the number of items in one device path; guards against a
/// malformed or hostile path looping the parser.
pub const MAX_PATH_ITEMS: usize = 16;
