use crate::Framed;
use std::fmt;

/// Produces a [`Location`] for the enclosing async function.
///
/// ```
/// # async fn work() {}
/// async fn outer() {
///     async_leaktest::location!().frame(work()).await
/// }
/// ```
#[macro_export]
macro_rules! location {
    () => {{
        macro_rules! fn_name {
            () => {{
                async {}.await;
                fn type_name_of_val<T: ?Sized>(_: &T) -> &'static str {
                    core::any::type_name::<T>()
                }
                $crate::location::strip_closures(type_name_of_val(&|| {}))
            }};
        }

        $crate::Location {
            fn_name: fn_name!(),
            file_name: file!(),
            line_no: line!(),
            col_no: column!(),
        }
    }};
}

/// Removes every trailing `::{{closure}}` segment from a type name.
#[doc(hidden)]
pub fn strip_closures(mut name: &'static str) -> &'static str {
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// A source code location in a function body.
///
/// To construct a `Location`, use [`location!()`].
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct Location {
    /// The name of the surrounding function.
    pub fn_name: &'static str,
    /// The name of the file in which this location occurs.
    pub file_name: &'static str,
    /// The line number of this location.
    pub line_no: u32,
    /// The column number of this location.
    pub col_no: u32,
}

impl Location {
    /// Include the given `future` in task dumps and leak reports with this
    /// location.
    pub fn frame<F>(self, future: F) -> Framed<F> {
        Framed::new(future, self)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}:{}:{}",
            self.fn_name, self.file_name, self.line_no, self.col_no
        )
    }
}
