//! Conversions between A1-style cell references and 0-based indexes.

/// Last row index a worksheet can hold (row 1048576).
pub(crate) const MAX_ROW_INDEX: usize = 1_048_575;
/// Last column index a worksheet can hold (column `XFD`).
pub(crate) const MAX_COL_INDEX: usize = 16_383;

/// Returns true if (row, col) lies inside the worksheet grid.
pub(crate) fn is_within_grid(row: usize, col: usize) -> bool {
    row <= MAX_ROW_INDEX && col <= MAX_COL_INDEX
}

/// Converts a column index (0-based) to letters, e.g. `27` to `AB`.
pub(crate) fn col_to_letters(col: usize) -> String {
    let mut letters = Vec::new();
    let mut rest = col + 1;
    while rest > 0 {
        let remainder = (rest - 1) % 26;
        letters.push(b'A' + remainder as u8);
        rest = (rest - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts column letters to a 0-based index, e.g. `AB` to `27`.
pub(crate) fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |index, character| {
        let character = character.to_ascii_uppercase();
        if character.is_ascii_uppercase() {
            let digit = (character as u8 - b'A') as usize + 1;
            index.checked_mul(26)?.checked_add(digit)
        } else {
            None
        }
    }).map(|index| index - 1)
}

/// Converts a 1-based row number to a 0-based index.
pub(crate) fn row_to_index(digits: &str) -> Option<usize> {
    digits.parse::<usize>().ok().filter(|row| *row > 0).map(|row| row - 1)
}

/// Converts (row, col) indexes to an A1-style reference.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Parses an A1-style reference into (row, col) indexes.
/// Absolute markers (`$`) are ignored.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip() {
        for (index, letters) in [(0, "A"), (25, "Z"), (26, "AA"), (27, "AB"), (701, "ZZ"), (702, "AAA")] {
            assert_eq!(col_to_letters(index), letters);
            assert_eq!(col_to_index(letters), Some(index));
        }
    }

    #[test]
    fn references() {
        assert_eq!(reference_to_index("A1"), Some((0, 0)));
        assert_eq!(reference_to_index("$C$10"), Some((9, 2)));
        assert_eq!(reference_to_index("10"), None);
        assert_eq!(reference_to_index("A0"), None);
        assert_eq!(reference_to_index("A"), None);
        assert_eq!(index_to_reference(9, 2), "C10");
    }

    #[test]
    fn grid_limits() {
        let (row, col) = reference_to_index("XFD1048576").unwrap();
        assert_eq!((row, col), (MAX_ROW_INDEX, MAX_COL_INDEX));
        assert!(is_within_grid(row, col));

        let (row, col) = reference_to_index("XFE1").unwrap();
        assert!(!is_within_grid(row, col));
        let (row, col) = reference_to_index("A1048577").unwrap();
        assert!(!is_within_grid(row, col));
    }
}
