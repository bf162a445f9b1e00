pub mod bytecode;
pub mod hack;
pub mod hdl;
pub mod script;
pub mod smap;
mod string_lexer;

pub use string_lexer::{Spanned, StringLexer};

/// Strip a directory path and extension, leaving the bare file name.
///
/// The basename identifies the static-segment owner of a `.vm` file.
pub fn file_basename(path: &str) -> &str {
    let name = path
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
