/*!
Values attached to log records as properties.
*/

use core::fmt;

use value_bag::ValueBag;

/**
An anonymous captured value.

Values are cheap to create and borrow from their source. They can be inspected as primitives or formatted, and when the `sval` feature is enabled, streamed as structured data.
*/
#[derive(Clone)]
pub struct Value<'v>(ValueBag<'v>);

impl<'v> Value<'v> {
    /**
    Capture a displayable value.
    */
    pub fn capture_display<T: fmt::Display + 'static>(value: &'v T) -> Self {
        Value(ValueBag::capture_display(value))
    }

    /**
    Get a value from a displayable type without capturing any of its other structure.
    */
    pub fn from_display<T: fmt::Display>(value: &'v T) -> Self {
        Value(ValueBag::from_display(value))
    }

    pub fn by_ref<'b>(&'b self) -> Value<'b> {
        Value(self.0.by_ref())
    }

    pub fn to_borrowed_str(&self) -> Option<&'v str> {
        self.0.to_borrowed_str()
    }

    pub fn to_bool(&self) -> Option<bool> {
        self.0.to_bool()
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.0.to_f64()
    }
}

impl<'v> fmt::Debug for Value<'v> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<'v> fmt::Display for Value<'v> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "sval")]
impl<'v> sval::Value for Value<'v> {
    fn stream<'sval, S: sval::Stream<'sval> + ?Sized>(&'sval self, stream: &mut S) -> sval::Result {
        self.0.stream(stream)
    }
}

/**
Convert a reference into a [`Value`].
*/
pub trait ToValue {
    fn to_value(&self) -> Value<'_>;
}

impl<'a, V: ToValue + ?Sized> ToValue for &'a V {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<'v> ToValue for Value<'v> {
    fn to_value(&self) -> Value<'_> {
        self.by_ref()
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value<'_> {
        Value(ValueBag::from(self))
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<'v> From<&'v str> for Value<'v> {
    fn from(value: &'v str) -> Self {
        Value(ValueBag::from(value))
    }
}

macro_rules! impl_primitive {
    ($($ty:ty,)*) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value<'_> {
                    Value(ValueBag::from(*self))
                }
            }

            impl<'v> From<$ty> for Value<'v> {
                fn from(value: $ty) -> Self {
                    Value(ValueBag::from(value))
                }
            }
        )*
    };
}

impl_primitive!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_casts() {
        assert_eq!(Some(42), 42i32.to_value().to_i64());
        assert_eq!(Some(true), true.to_value().to_bool());
        assert_eq!(Some("text"), "text".to_value().to_borrowed_str());
        assert_eq!(Some(1.5), 1.5f64.to_value().to_f64());
    }

    #[test]
    fn display_capture() {
        let value = String::from("captured");

        assert_eq!("captured", Value::from_display(&value).to_string());
    }
}
