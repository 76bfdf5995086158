//! String to value conversion used throughout the consumers.
//!
//! Results files are text and every typed view of a sample goes through this
//! module. Input is trimmed before parsing. Booleans are case-insensitive
//! `true`/`false`, numbers accept a leading sign and exponent notation, a
//! `char` is the single character left after trimming.
//!
//! Conversion failures are errors here. Callers that have a default policy,
//! chiefly [`crate::sample::Sample`]'s typed accessors, catch them and
//! substitute.

/// Errors produced by conversion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Nothing remained after trimming the input.
    #[error("Cannot convert empty input to {target}")]
    Empty {
        /// Name of the requested type
        target: &'static str,
    },
    /// Input is not `true` or `false`.
    #[error("Invalid boolean: {input:?}")]
    InvalidBool {
        /// The offending input
        input: String,
    },
    /// Input is not a number representable by the requested type.
    #[error("Invalid {target} number: {input:?}")]
    InvalidNumber {
        /// Name of the requested type
        target: &'static str,
        /// The offending input
        input: String,
    },
    /// More than one character remained after trimming.
    #[error("Expected a single character, got {input:?}")]
    InvalidChar {
        /// The offending input
        input: String,
    },
}

/// A type that can be produced from a single text field.
pub trait FromField: Sized {
    /// Convert `input` into `Self`.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input cannot represent `Self`.
    fn from_field(input: &str) -> Result<Self, Error>;
}

/// A conversion function from text to `T`.
pub type Converter<T> = fn(&str) -> Result<T, Error>;

/// Look up the converter for `T`.
#[must_use]
pub fn converter<T: FromField>() -> Converter<T> {
    T::from_field
}

/// Convert `input` to `T`.
///
/// # Errors
///
/// See [`FromField::from_field`].
pub fn convert<T: FromField>(input: &str) -> Result<T, Error> {
    T::from_field(input)
}

impl FromField for String {
    /// Strings are taken verbatim, no trimming.
    fn from_field(input: &str) -> Result<Self, Error> {
        Ok(input.to_string())
    }
}

impl FromField for bool {
    fn from_field(input: &str) -> Result<Self, Error> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::Empty { target: "bool" });
        }
        if trimmed.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(Error::InvalidBool {
                input: input.to_string(),
            })
        }
    }
}

impl FromField for char {
    fn from_field(input: &str) -> Result<Self, Error> {
        let mut chars = input.trim().chars();
        match (chars.next(), chars.next()) {
            (None, _) => Err(Error::Empty { target: "char" }),
            (Some(c), None) => Ok(c),
            (Some(_), Some(_)) => Err(Error::InvalidChar {
                input: input.to_string(),
            }),
        }
    }
}

macro_rules! float_from_field {
    ($($t:ty),*) => {
        $(
            impl FromField for $t {
                fn from_field(input: &str) -> Result<Self, Error> {
                    let trimmed = input.trim();
                    if trimmed.is_empty() {
                        return Err(Error::Empty { target: stringify!($t) });
                    }
                    trimmed.parse::<$t>().map_err(|_| Error::InvalidNumber {
                        target: stringify!($t),
                        input: input.to_string(),
                    })
                }
            }
        )*
    };
}

float_from_field!(f32, f64);

// Integers first try an exact integer parse. Failing that, exponent notation
// such as `1e3` is accepted when it denotes a whole number within range.
macro_rules! int_from_field {
    ($($t:ty),*) => {
        $(
            impl FromField for $t {
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss,
                    clippy::float_cmp
                )]
                fn from_field(input: &str) -> Result<Self, Error> {
                    let trimmed = input.trim();
                    if trimmed.is_empty() {
                        return Err(Error::Empty { target: stringify!($t) });
                    }
                    if let Ok(v) = trimmed.parse::<$t>() {
                        return Ok(v);
                    }
                    let invalid = || Error::InvalidNumber {
                        target: stringify!($t),
                        input: input.to_string(),
                    };
                    let float = trimmed.parse::<f64>().map_err(|_| invalid())?;
                    if !float.is_finite()
                        || float.fract() != 0.0
                        || float < <$t>::MIN as f64
                        || float > <$t>::MAX as f64
                    {
                        return Err(invalid());
                    }
                    Ok(float as $t)
                }
            }
        )*
    };
}

int_from_field!(i32, i64, u32, u64, usize);
