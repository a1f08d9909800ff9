//! Dense integer handles into the model's arenas.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            pub fn value(self) -> u32 {
                self.0
            }

            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                $name(value)
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                $name(value as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

define_index!(
    /// Position of an operand in the [`OperandSet`](super::OperandSet).
    OperandIndex
);
define_index!(
    /// Position of an operation in the model's node list.
    OperationIndex
);
define_index!(
    /// Position in the ordered graph input or graph output list.
    IoIndex
);
