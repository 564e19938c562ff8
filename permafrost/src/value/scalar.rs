use {super::{Val, Value}, thiserror::Error};

/// The largest payload a scalar can carry.
pub const MAX_SCALAR: u64 = u64::MAX >> 1;

/// Returned when a scalar payload does not fit in 63 bits.
#[derive(Debug, Eq, Error, PartialEq)]
#[error("Scalar payload {payload:#x} does not fit in 63 bits")]
pub struct ScalarRangeError
{
    /// The payload that was rejected.
    pub payload: u64,
}

macro_rules! scalar_from_small
{
    { $($name:ident $type:ty;)* } => {
        $(
            /// Create a scalar value.
            pub fn $name(value: $type) -> Self
            {
                let payload = value as u64;
                // SAFETY: The payload fits and the word is tagged.
                unsafe { Self::from_scalar_word(payload << 1 | 0b1) }
            }
        )*
    };
}

/// Working with scalar values.
impl Value
{
    scalar_from_small! {
        scalar_from_bool bool;
        scalar_from_u8   u8  ;
        scalar_from_u16  u16 ;
        scalar_from_u32  u32 ;
    }

    /// Create a scalar value from an arbitrary payload.
    ///
    /// Scalars are unboxed; they occupy no heap memory
    /// and are copied verbatim wherever they are referenced.
    pub fn scalar(payload: u64) -> Result<Self, ScalarRangeError>
    {
        if payload > MAX_SCALAR {
            return Err(ScalarRangeError{payload});
        }
        // SAFETY: The payload fits and the word is tagged.
        Ok(unsafe { Self::from_scalar_word(payload << 1 | 0b1) })
    }

    /// See [`Self::borrow`].
    pub (super) fn borrow_scalar(&self) -> Val
    {
        Val::Scalar(self.inner.get() >> 1)
    }
}
