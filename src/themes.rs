// The built-in display themes. The engine never sees these; they exist so
// any front end can render the session the way the user picked at sign-up.

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    pub surface: &'static str,     // main area background
    pub text: &'static str,        // main area text
    pub banner: &'static str,      // banner background
    pub banner_text: &'static str, // banner text
    pub accent: &'static str,      // buttons and highlights
}

impl Theme {
    /// Paints text with the banner palette. An unparseable palette entry
    /// leaves the text unstyled.
    pub fn paint_banner(&self, text: &str) -> String {
        match (rgb(self.banner_text), rgb(self.banner)) {
            (Some((fr, fg, fb)), Some((br, bg, bb))) => text
                .truecolor(fr, fg, fb)
                .on_truecolor(br, bg, bb)
                .to_string(),
            _ => text.to_string(),
        }
    }

    /// Paints text with the accent color.
    pub fn paint_accent(&self, text: &str) -> String {
        match rgb(self.accent) {
            Some((r, g, b)) => text.truecolor(r, g, b).to_string(),
            None => text.to_string(),
        }
    }
}

pub const DEFAULT_THEME: &str = "Slam Diego (Padres Mode)";

const THEMES: &[Theme] = &[
    Theme {
        name: "Slam Diego (Padres Mode)",
        surface: "#DCCBA5",
        text: "#2F2617",
        banner: "#4A3624",
        banner_text: "#FCD581",
        accent: "#D6A419",
    },
    Theme {
        name: "Bolt Mode (Chargers)",
        surface: "#ECF7FF",
        text: "#002244",
        banner: "#0073CF",
        banner_text: "#FFC20E",
        accent: "#FFC20E",
    },
    Theme {
        name: "Arizona Cardinals",
        surface: "#A71930",
        text: "#FFFFFF",
        banner: "#000000",
        banner_text: "#FFFFFF",
        accent: "#FFFFFF",
    },
    Theme {
        name: "Glasgow Rangers",
        surface: "#0033A0",
        text: "#FFFFFF",
        banner: "#FFFFFF",
        banner_text: "#0033A0",
        accent: "#0033A0",
    },
    Theme {
        name: "San Diego FC",
        surface: "#C320AE",
        text: "#FFFFFF",
        banner: "#002147",
        banner_text: "#00E6E6",
        accent: "#00E6E6",
    },
    Theme {
        name: "Yankees",
        surface: "#132448",
        text: "#FFFFFF",
        banner: "#FFFFFF",
        banner_text: "#132448",
        accent: "#132448",
    },
    Theme {
        name: "USA",
        surface: "#FFFFFF",
        text: "#000080",
        banner: "#FF0000",
        banner_text: "#FFFFFF",
        accent: "#FFFFFF",
    },
];

/// Exact-name lookup.
pub fn find(name: &str) -> Option<&'static Theme> {
    THEMES.iter().find(|theme| theme.name == name)
}

/// Like [`find`], but unknown names fall back to the default theme.
pub fn lookup(name: &str) -> &'static Theme {
    find(name).unwrap_or_else(default_theme)
}

// The default sits first in the table.
pub fn default_theme() -> &'static Theme {
    &THEMES[0]
}

pub fn theme_names() -> impl Iterator<Item = &'static str> {
    THEMES.iter().map(|theme| theme.name)
}

// "#RRGGBB" to its channels. Anything else is None.
fn rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let value = u32::from_str_radix(digits, 16).ok()?;
    Some(((value >> 16) as u8, (value >> 8) as u8, value as u8))
}
