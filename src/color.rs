use std::fmt::{Display, Formatter};

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum Color {
    Red,
    Pink,
    Purple,
    DeepPurple,
    Indigo,
    #[default]
    Blue,
    LightBlue,
    Cyan,
    Teal,
    Green,
    LightGreen,
    Lime,
    Amber,
    Orange,
    Brown,
}

pub const PALETTE: [Color; 15] = [
    Color::Red,
    Color::Pink,
    Color::Purple,
    Color::DeepPurple,
    Color::Indigo,
    Color::Blue,
    Color::LightBlue,
    Color::Cyan,
    Color::Teal,
    Color::Green,
    Color::LightGreen,
    Color::Lime,
    Color::Amber,
    Color::Orange,
    Color::Brown,
];

impl Color {
    pub fn hex(self) -> &'static str {
        match self {
            Color::Red => "#FF6B6B",
            Color::Pink => "#FF9AA2",
            Color::Purple => "#C49BBB",
            Color::DeepPurple => "#A093C7",
            Color::Indigo => "#8CA6DB",
            Color::Blue => "#6BAED6",
            Color::LightBlue => "#63C5DA",
            Color::Cyan => "#56D4DD",
            Color::Teal => "#4DB6AC",
            Color::Green => "#6FCF97",
            Color::LightGreen => "#A0E6A3",
            Color::Lime => "#D2F898",
            Color::Amber => "#FFE066",
            Color::Orange => "#FFA94D",
            Color::Brown => "#B28D6B",
        }
    }

    /// Case-insensitive lookup of a palette entry by its hex string.
    pub fn from_hex(hex: &str) -> Option<Color> {
        let hex = hex.trim();
        PALETTE
            .iter()
            .copied()
            .find(|color| color.hex().eq_ignore_ascii_case(hex))
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::{Color, PALETTE};

    #[test]
    fn hex_lookup_ignores_case_and_whitespace() {
        assert_eq!(Color::from_hex("#6baed6"), Some(Color::Blue));
        assert_eq!(Color::from_hex(" #B28D6B "), Some(Color::Brown));
        assert_eq!(Color::from_hex("#000000"), None);
    }

    #[test]
    fn palette_hex_values_are_unique() {
        for (index, color) in PALETTE.iter().enumerate() {
            assert_eq!(Color::from_hex(color.hex()), Some(*color));
            assert!(
                PALETTE[index + 1..]
                    .iter()
                    .all(|other| other.hex() != color.hex())
            );
        }
    }
}
