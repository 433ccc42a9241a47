use enumflags2::{bitflags, BitFlags};

/// Flags describing which command-line inputs a target platform requires.
///
/// Mirrors the `PLATFORM_NEED_*`/`PLATFORM_OPTIONAL_*` bitmask constants of
/// the original C tool's `pcr.h`; kept as an `enumflags2` set rather than a
/// bare `u32` so call sites read as `flags.contains(PlatformFlag::PublicKey)`
/// instead of magic hex literals.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFlag {
    InputFile = 0x0001,
    OutputFile = 0x0002,
    PcrSelection = 0x0004,
    PublicKey = 0x0008,
    SignedPolicy = 0x0010,
    OptionalPcrPolicy = 0x0020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    Tpm2_0,
    Systemd,
}

impl TargetPlatform {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "tpm2.0" => Some(TargetPlatform::Tpm2_0),
            "systemd" => Some(TargetPlatform::Systemd),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TargetPlatform::Tpm2_0 => "tpm2.0",
            TargetPlatform::Systemd => "systemd",
        }
    }

    pub fn unseal_flags(&self) -> BitFlags<PlatformFlag> {
        use PlatformFlag::*;
        match self {
            TargetPlatform::Tpm2_0 => InputFile | OutputFile | PcrSelection,
            TargetPlatform::Systemd => OutputFile | PcrSelection | OptionalPcrPolicy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpm2_0_needs_input_and_output_files() {
        let flags = TargetPlatform::Tpm2_0.unseal_flags();
        assert!(flags.contains(PlatformFlag::InputFile));
        assert!(flags.contains(PlatformFlag::OutputFile));
        assert!(!flags.contains(PlatformFlag::PublicKey));
    }

    #[test]
    fn systemd_pcr_policy_is_optional() {
        let flags = TargetPlatform::Systemd.unseal_flags();
        assert!(flags.contains(PlatformFlag::OptionalPcrPolicy));
        assert!(!flags.contains(PlatformFlag::InputFile));
    }

    #[test]
    fn by_name_round_trips() {
        assert_eq!(TargetPlatform::by_name("tpm2.0").unwrap().name(), "tpm2.0");
        assert_eq!(TargetPlatform::by_name("systemd").unwrap().name(), "systemd");
        assert!(TargetPlatform::by_name("bogus").is_none());
    }
}
