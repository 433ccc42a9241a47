use std::process::Command;

/// External binaries this crate shells out to instead of linking against
/// their native libraries, the same way this codebase's utility layer
/// already treats `cryptsetup`/`efivar`/`systemd-cryptenroll` as processes
/// rather than linked libraries.
///
/// The TPM 2.0 stack (ESAPI/TSS2) and OpenSSL's RSA/ASN.1 primitives are
/// explicitly out of this crate's scope; `tpm2-tools` is the process
/// boundary through which both are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Tpm2PcrRead,
    Tpm2CreatePrimary,
    Tpm2Create,
    Tpm2Load,
    Tpm2Unseal,
    Tpm2PolicyPcr,
    Tpm2StartAuthSession,
    Tpm2Sign,
    Tpm2VerifySignature,
    Tpm2FlushContext,
    Uname,
    Efivar,
}

impl Dependency {
    pub fn program(&self) -> &'static str {
        match self {
            Dependency::Tpm2PcrRead => "tpm2_pcrread",
            Dependency::Tpm2CreatePrimary => "tpm2_createprimary",
            Dependency::Tpm2Create => "tpm2_create",
            Dependency::Tpm2Load => "tpm2_load",
            Dependency::Tpm2Unseal => "tpm2_unseal",
            Dependency::Tpm2PolicyPcr => "tpm2_policypcr",
            Dependency::Tpm2StartAuthSession => "tpm2_startauthsession",
            Dependency::Tpm2Sign => "tpm2_sign",
            Dependency::Tpm2VerifySignature => "tpm2_verifysignature",
            Dependency::Tpm2FlushContext => "tpm2_flushcontext",
            Dependency::Uname => "uname",
            Dependency::Efivar => "efivar",
        }
    }

    pub fn cmd(&self) -> Command {
        Command::new(self.program())
    }
}
