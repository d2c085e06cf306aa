use std::fmt::{Formatter as FmtFormatter, Result as FmtResult};

pub fn get_indent(depth: usize) -> String {
    "  ".repeat(depth)
}

pub trait PrettyDisplay {
    fn pretty_fmt(&self, f: &mut FmtFormatter<'_>, depth: usize) -> FmtResult;
}

/// Renders a [`PrettyDisplay`] value with `{}`.
pub struct Pretty<'a, T: PrettyDisplay>(pub &'a T);

impl<T: PrettyDisplay> std::fmt::Display for Pretty<'_, T> {
    fn fmt(&self, f: &mut FmtFormatter<'_>) -> FmtResult {
        self.0.pretty_fmt(f, 0)
    }
}
