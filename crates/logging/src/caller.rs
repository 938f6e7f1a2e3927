//! Call-site attribution for monitor reports.
//!
//! Monitor events carry the reporting call site as `(function, file, line)`.
//! Plain method calls capture file and line through `#[track_caller]`;
//! stable Rust exposes no function name that way, so those frames record
//! [`UNKNOWN_FUNCTION`]. The [`caller_frame!`](crate::caller_frame) macro
//! captures the full frame, enclosing function included, and wrapper layers
//! pass frames down through the explicit-frame entry points to keep
//! attribution pointing at their own caller.

use std::borrow::Cow;
use std::panic::Location;
use std::path::Path;

/// Function placeholder for frames captured without callsite macros.
pub const UNKNOWN_FUNCTION: &str = "unknown";

/// Source position of an emit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerFrame {
    function: Cow<'static, str>,
    file: Cow<'static, str>,
    line: u32,
}

impl CallerFrame {
    pub fn new(
        function: impl Into<Cow<'static, str>>,
        file: impl Into<Cow<'static, str>>,
        line: u32,
    ) -> Self {
        Self {
            function: function.into(),
            file: file.into(),
            line,
        }
    }

    /// Frame of the immediate caller. Propagates through every
    /// `#[track_caller]` wrapper above it, so the recorded position is the
    /// outermost non-annotated call site.
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self::new(UNKNOWN_FUNCTION, location.file(), location.line())
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Base name of the source file.
    pub fn base_file(&self) -> &str {
        Path::new(self.file.as_ref())
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(self.file.as_ref())
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

/// Captures the enclosing function path along with file and line.
#[macro_export]
macro_rules! caller_frame {
    () => {{
        fn __here() {}
        fn __name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::CallerFrame::new(
            __name_of(__here).trim_end_matches("::__here"),
            file!(),
            line!(),
        )
    }};
}
