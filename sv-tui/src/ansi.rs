//! ANSI escape emission.
//!
//! All cursor, erase, and SGR sequences the diff renderer emits are built
//! here, byte-exact, into caller-owned buffers.

use crate::buffer::Attr;

/// Move the cursor to a 0-based (row, col) cell.
pub fn cursor_to(out: &mut Vec<u8>, row: u16, col: u16) {
    out.extend_from_slice(format!("\x1b[{};{}H", row + 1, col + 1).as_bytes());
}

/// Move the cursor to the home position.
pub fn home(out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[H");
}

/// Erase from the cursor to the end of the line.
pub fn erase_to_eol(out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[K");
}

/// Erase the whole display.
pub fn clear_display(out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[2J");
}

/// Reset all display attributes.
pub fn sgr_reset(out: &mut Vec<u8>) {
    out.extend_from_slice(b"\x1b[0m");
}

/// Apply an attribute set.
pub fn sgr(out: &mut Vec<u8>, attr: &Attr) {
    let mut params: Vec<String> = Vec::new();
    if attr.bold {
        params.push("1".into());
    }
    if attr.dim {
        params.push("2".into());
    }
    if attr.italic {
        params.push("3".into());
    }
    if attr.underline {
        params.push("4".into());
    }
    if attr.reverse {
        params.push("7".into());
    }
    if let Some(fg) = attr.fg {
        params.push(format!("38;5;{}", fg));
    }
    if let Some(bg) = attr.bg {
        params.push(format!("48;5;{}", bg));
    }
    if params.is_empty() {
        return;
    }
    out.extend_from_slice(format!("\x1b[{}m", params.join(";")).as_bytes());
}

/// Enter the alternate screen.
pub const ENTER_ALT_SCREEN: &[u8] = b"\x1b[?1049h";
/// Leave the alternate screen.
pub const EXIT_ALT_SCREEN: &[u8] = b"\x1b[?1049l";
/// Hide the cursor.
pub const HIDE_CURSOR: &[u8] = b"\x1b[?25l";
/// Show the cursor.
pub const SHOW_CURSOR: &[u8] = b"\x1b[?25h";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_is_one_based() {
        let mut out = Vec::new();
        cursor_to(&mut out, 0, 0);
        assert_eq!(out, b"\x1b[1;1H");

        out.clear();
        cursor_to(&mut out, 4, 9);
        assert_eq!(out, b"\x1b[5;10H");
    }

    #[test]
    fn test_sgr_composition() {
        let mut out = Vec::new();
        sgr(
            &mut out,
            &Attr {
                bold: true,
                fg: Some(196),
                ..Default::default()
            },
        );
        assert_eq!(out, b"\x1b[1;38;5;196m");
    }

    #[test]
    fn test_plain_attr_emits_nothing() {
        let mut out = Vec::new();
        sgr(&mut out, &Attr::default());
        assert!(out.is_empty());
    }
}
