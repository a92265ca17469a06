use std::collections::HashMap;

use once_cell::sync::Lazy;

const FONT_HEIGHT: usize = 5;
const FILL: &str = "██";
const GAP: &str = "  ";

type Glyph = [&'static str; FONT_HEIGHT];

const BLANK: Glyph = ["   "; FONT_HEIGHT];

static GLYPHS: Lazy<HashMap<char, Glyph>> = Lazy::new(|| {
    HashMap::from([
        ('0', ["111", "1 1", "1 1", "1 1", "111"]),
        ('1', [" 1 ", "11 ", " 1 ", " 1 ", "111"]),
        ('2', ["111", "  1", "111", "1  ", "111"]),
        ('3', ["111", "  1", " 11", "  1", "111"]),
        ('4', ["1 1", "1 1", "111", "  1", "  1"]),
        ('5', ["111", "1  ", "111", "  1", "111"]),
        ('6', ["111", "1  ", "111", "1 1", "111"]),
        ('7', ["111", "  1", "  1", "  1", "  1"]),
        ('8', ["111", "1 1", "111", "1 1", "111"]),
        ('9', ["111", "1 1", "111", "  1", "111"]),
        (':', [" ", "1", " ", "1", " "]),
        (' ', BLANK),
    ])
});

/// Height in rows of rendered text.
pub const HEIGHT: u16 = FONT_HEIGHT as u16;

/// Render digits and `:` as large block text. Other characters become blanks.
pub fn render(text: &str) -> Vec<String> {
    let glyphs: Vec<&Glyph> = text
        .chars()
        .map(|ch| GLYPHS.get(&ch).unwrap_or(&BLANK))
        .collect();

    (0..FONT_HEIGHT)
        .map(|row| {
            glyphs
                .iter()
                .map(|glyph| {
                    glyph[row]
                        .chars()
                        .map(|cell| if cell == '1' { FILL } else { GAP })
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join(" ")
                .trim_end()
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_clock_digits() {
        let lines = render("1:0");
        assert_eq!(lines.len(), FONT_HEIGHT);
        assert_eq!(lines[0], "  ██      ██████");
        assert_eq!(lines[1], "████   ██ ██  ██");
    }

    #[test]
    fn unknown_characters_render_blank() {
        assert!(render("?").iter().all(|line| line.is_empty()));
    }
}
