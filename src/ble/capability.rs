//! Characteristic capability inspection.
//!
//! Pure predicates over the GATT characteristic properties byte, plus
//! the deterministic write-mode resolution used by the dispatcher.

use bitflags::bitflags;

use crate::ble::WriteMode;

bitflags! {
    /// Properties byte from a characteristic declaration.
    ///
    /// Sourced from the transport during discovery; immutable afterwards.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    pub struct CharacteristicProps: u8 {
        const BROADCAST                   = 0x01;
        const READ                        = 0x02;
        const WRITE_WITHOUT_RESPONSE      = 0x04;
        const WRITE                       = 0x08;
        const NOTIFY                      = 0x10;
        const INDICATE                    = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES         = 0x80;
    }
}

impl CharacteristicProps {
    pub fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn is_writable_without_response(self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    pub fn is_notifiable(self) -> bool {
        self.contains(Self::NOTIFY)
    }

    pub fn is_indicatable(self) -> bool {
        self.contains(Self::INDICATE)
    }

    /// Pick the write mode for a payload: with-response when supported,
    /// else without-response, else `None`.
    pub fn resolve_write_mode(self) -> Option<WriteMode> {
        if self.is_writable() {
            Some(WriteMode::WithResponse)
        } else if self.is_writable_without_response() {
            Some(WriteMode::WithoutResponse)
        } else {
            None
        }
    }

    /// Whether an explicitly requested write mode is supported.
    pub fn supports_write_mode(self, mode: WriteMode) -> bool {
        match mode {
            WriteMode::WithResponse => self.is_writable(),
            WriteMode::WithoutResponse => self.is_writable_without_response(),
        }
    }

    /// Comma-separated property names for the GATT table dump,
    /// `"EMPTY"` when none apply.
    pub fn describe(self) -> String {
        let mut names: Vec<&str> = Vec::new();
        if self.is_readable() {
            names.push("READABLE");
        }
        if self.is_writable() {
            names.push("WRITABLE");
        }
        if self.is_writable_without_response() {
            names.push("WRITABLE WITHOUT RESPONSE");
        }
        if self.is_notifiable() {
            names.push("NOTIFIABLE");
        }
        if self.is_indicatable() {
            names.push("INDICATABLE");
        }
        if names.is_empty() {
            String::from("EMPTY")
        } else {
            names.join(", ")
        }
    }
}
