use std::error;
use std::fmt;

/// An error enum used throughout the Cadmium crate to communicate details of runtime
/// failures to the hosting application.
///
/// Every variant belongs to one of four broad kinds (see [CadmiumError::kind]): ROM
/// loading problems leave the core untouched, property problems abort core
/// construction, emulation-fatal conditions freeze the affected CPU in its error
/// state until reset, and compile errors are merely stored on behalf of the
/// assembler collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum CadmiumError {
    /// The ROM file could not be found or opened
    RomFileNotFound { path: String },
    /// The ROM does not fit into the addressable memory of the selected variant
    RomTooLarge { size: usize, capacity: usize },
    /// A container file (e.g. C8B) carried an unusable header
    BadCartridgeHeader { reason: String },
    /// A property class name that no factory was registered for
    UnknownPropertyClass { class: String },
    /// A property name that does not exist within its class
    UnknownProperty { name: String },
    /// A property value of the wrong type was supplied
    PropertyTypeMismatch { name: String },
    /// A property diff was applied to a `Properties` of a different class
    PropertyClassMismatch { expected: String, found: String },
    /// An opcode that is illegal for the configured variant was fetched
    IllegalOpcode { opcode: u16, address: u32 },
    /// A memory access beyond the addressable range
    MemoryAddressOutOfBounds { address: u32 },
    /// A subroutine call nested deeper than the variant's stack allows
    StackOverflow,
    /// A return was executed with an empty stack
    StackUnderflow,
    /// The backend CPU of a real-hardware core stopped making progress
    BackendStalled { message: String },
    /// A key ordinal outside the valid CHIP-8 keypad range (0x0 to 0xF)
    InvalidKey { key: u8 },
    /// An error message surfaced by the compiler collaborator; stored, not interpreted
    CompileError { message: String },
    /// A watch/trace expression failed to parse or evaluate
    ExpressionError { message: String },
}

/// The coarse classification of a [CadmiumError], matching the recovery rules the
/// host has to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RomLoad,
    Properties,
    EmulationFatal,
    Compile,
}

impl CadmiumError {
    /// Returns the broad kind this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        use CadmiumError::*;
        match self {
            RomFileNotFound { .. } | RomTooLarge { .. } | BadCartridgeHeader { .. } => {
                ErrorKind::RomLoad
            }
            UnknownPropertyClass { .. }
            | UnknownProperty { .. }
            | PropertyTypeMismatch { .. }
            | PropertyClassMismatch { .. } => ErrorKind::Properties,
            IllegalOpcode { .. }
            | MemoryAddressOutOfBounds { .. }
            | StackOverflow
            | StackUnderflow
            | BackendStalled { .. }
            | InvalidKey { .. } => ErrorKind::EmulationFatal,
            CompileError { .. } | ExpressionError { .. } => ErrorKind::Compile,
        }
    }

    /// Returns the process exit code a command-line wrapper should use for this
    /// error: `2` for invalid ROM or properties, `3` for fatal emulation errors.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::EmulationFatal => 3,
            _ => 2,
        }
    }
}

impl error::Error for CadmiumError {}

impl fmt::Display for CadmiumError {
    /// Returns a textual description of each enum variant for display purposes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CadmiumError::*;
        match self {
            RomFileNotFound { path } => {
                write!(f, "rom file {} could not be opened", path)
            }
            RomTooLarge { size, capacity } => {
                write!(
                    f,
                    "rom of {} bytes exceeds the {} addressable bytes of this variant",
                    size, capacity
                )
            }
            BadCartridgeHeader { reason } => {
                write!(f, "unusable cartridge header: {}", reason)
            }
            UnknownPropertyClass { class } => {
                write!(f, "no core factory registered for property class {:?}", class)
            }
            UnknownProperty { name } => {
                write!(f, "no property named {:?}", name)
            }
            PropertyTypeMismatch { name } => {
                write!(f, "property {:?} was accessed with the wrong value type", name)
            }
            PropertyClassMismatch { expected, found } => {
                write!(
                    f,
                    "diff for property class {:?} applied to class {:?}",
                    found, expected
                )
            }
            IllegalOpcode { opcode, address } => {
                write!(
                    f,
                    "illegal opcode {:04X} for this variant at {:04X}",
                    opcode, address
                )
            }
            MemoryAddressOutOfBounds { address } => {
                write!(
                    f,
                    "memory address {:#06X} is outside the addressable range",
                    address
                )
            }
            StackOverflow => write!(f, "call stack overflow"),
            StackUnderflow => write!(f, "return with empty call stack"),
            BackendStalled { message } => {
                write!(f, "backend cpu stalled: {}", message)
            }
            InvalidKey { key } => write!(f, "invalid key {} was specified", key),
            CompileError { message } => write!(f, "compile error: {}", message),
            ExpressionError { message } => write!(f, "expression error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            CadmiumError::RomTooLarge { size: 5000, capacity: 3584 }.kind(),
            ErrorKind::RomLoad
        );
        assert_eq!(
            CadmiumError::UnknownPropertyClass { class: "NOPE".into() }.kind(),
            ErrorKind::Properties
        );
        assert_eq!(
            CadmiumError::IllegalOpcode { opcode: 0xF000, address: 0x200 }.kind(),
            ErrorKind::EmulationFatal
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CadmiumError::RomFileNotFound { path: "x.ch8".into() }.exit_code(),
            2
        );
        assert_eq!(CadmiumError::StackOverflow.exit_code(), 3);
    }
}
