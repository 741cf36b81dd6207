//! Fixed key code to character table.
//!
//! Codes follow the Linux input event codes (`linux/input-event-codes.h`),
//! which is what HID keyboard sensors produce through evdev. Each entry
//! carries the unshifted and shifted character.

pub const KEY_ENTER: u16 = 28;
pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_RIGHTSHIFT: u16 = 54;
pub const KEY_KPENTER: u16 = 96;

/// Line terminator produced by the enter keys.
pub const LINE_TERMINATOR: char = '\n';

const KEY_TABLE: &[(u16, char, char)] = &[
    (2, '1', '!'),
    (3, '2', '@'),
    (4, '3', '#'),
    (5, '4', '$'),
    (6, '5', '%'),
    (7, '6', '^'),
    (8, '7', '&'),
    (9, '8', '*'),
    (10, '9', '('),
    (11, '0', ')'),
    (12, '-', '_'),
    (13, '=', '+'),
    (15, '\t', '\t'),
    (16, 'q', 'Q'),
    (17, 'w', 'W'),
    (18, 'e', 'E'),
    (19, 'r', 'R'),
    (20, 't', 'T'),
    (21, 'y', 'Y'),
    (22, 'u', 'U'),
    (23, 'i', 'I'),
    (24, 'o', 'O'),
    (25, 'p', 'P'),
    (26, '[', '{'),
    (27, ']', '}'),
    (KEY_ENTER, '\n', '\n'),
    (30, 'a', 'A'),
    (31, 's', 'S'),
    (32, 'd', 'D'),
    (33, 'f', 'F'),
    (34, 'g', 'G'),
    (35, 'h', 'H'),
    (36, 'j', 'J'),
    (37, 'k', 'K'),
    (38, 'l', 'L'),
    (39, ';', ':'),
    (40, '\'', '"'),
    (41, '`', '~'),
    (43, '\\', '|'),
    (44, 'z', 'Z'),
    (45, 'x', 'X'),
    (46, 'c', 'C'),
    (47, 'v', 'V'),
    (48, 'b', 'B'),
    (49, 'n', 'N'),
    (50, 'm', 'M'),
    (51, ',', '<'),
    (52, '.', '>'),
    (53, '/', '?'),
    (55, '*', '*'),
    (57, ' ', ' '),
    // Keypad
    (71, '7', '7'),
    (72, '8', '8'),
    (73, '9', '9'),
    (74, '-', '-'),
    (75, '4', '4'),
    (76, '5', '5'),
    (77, '6', '6'),
    (78, '+', '+'),
    (79, '1', '1'),
    (80, '2', '2'),
    (81, '3', '3'),
    (82, '0', '0'),
    (83, '.', '.'),
    (KEY_KPENTER, '\n', '\n'),
    (98, '/', '/'),
];

/// Check whether a code is one of the shift modifiers.
pub fn is_shift(code: u16) -> bool {
    code == KEY_LEFTSHIFT || code == KEY_RIGHTSHIFT
}

/// Translate a key code to a character. Unmapped codes yield `None`.
pub fn key_to_char(code: u16, shifted: bool) -> Option<char> {
    KEY_TABLE
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|&(_, plain, shift)| if shifted { shift } else { plain })
}

/// Reverse lookup: the key code and shift state that type `ch`.
///
/// Main-block keys win over keypad keys for characters present on both.
pub fn char_to_key(ch: char) -> Option<(u16, bool)> {
    KEY_TABLE.iter().find_map(|&(code, plain, shift)| {
        if plain == ch {
            Some((code, false))
        } else if shift == ch {
            Some((code, true))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_and_shifted_symbols() {
        assert_eq!(key_to_char(2, false), Some('1'));
        assert_eq!(key_to_char(11, false), Some('0'));
        assert_eq!(key_to_char(6, true), Some('%'));
        assert_eq!(key_to_char(46, true), Some('C'));
        assert_eq!(key_to_char(46, false), Some('c'));
    }

    #[test]
    fn test_unmapped_codes() {
        assert_eq!(key_to_char(1, false), None); // escape
        assert_eq!(key_to_char(KEY_LEFTSHIFT, false), None);
        assert_eq!(key_to_char(58, false), None); // caps lock
        assert_eq!(key_to_char(999, false), None);
    }

    #[test]
    fn test_enter_keys_terminate() {
        assert_eq!(key_to_char(KEY_ENTER, false), Some(LINE_TERMINATOR));
        assert_eq!(key_to_char(KEY_KPENTER, true), Some(LINE_TERMINATOR));
    }

    #[test]
    fn test_reverse_lookup() {
        assert_eq!(char_to_key('%'), Some((6, true)));
        assert_eq!(char_to_key('.'), Some((52, false)));
        assert_eq!(char_to_key('\n'), Some((KEY_ENTER, false)));
        assert_eq!(char_to_key('é'), None);

        for ch in "29.54[C]39.58[%RH]1S\t".chars() {
            let (code, shifted) = char_to_key(ch).unwrap();
            assert_eq!(key_to_char(code, shifted), Some(ch));
        }
    }
}
