//! Immutable view over the invocation arguments.

/// The arguments a daemon was started with, program name excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: Vec<String>,
}

impl Options {
    /// Captures `args`, dropping the first entry (the program name).
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Options {
            values: args.into_iter().skip(1).map(Into::into).collect(),
        }
    }

    /// Captures the current process arguments. Non UTF-8 bytes are replaced.
    pub fn from_env() -> Self {
        Self::from_args(std::env::args_os().map(|arg| arg.to_string_lossy().into_owned()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The argument at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}
