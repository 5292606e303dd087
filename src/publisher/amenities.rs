//! Amenity name → icon name mapping used by the property site.

use serde::{Deserialize, Serialize};

/// Substring keys checked in order; the first hit wins.
const AMENITY_ICONS: &[(&str, &str)] = &[
    ("swimming pool", "waves"),
    ("pool", "waves"),
    ("garden", "flower2"),
    ("parking", "car"),
    ("garage", "car"),
    ("covered car park", "car"),
    ("balcony", "door-open"),
    ("terrace", "sun"),
    ("kitchen", "cooking-pot"),
    ("living room", "sofa"),
    ("bedroom", "bed-double"),
    ("bathroom", "bath"),
    ("air conditioning", "air-vent"),
    ("central cooling", "air-vent"),
    ("central heating", "flame"),
    ("gym", "dumbbell"),
    ("fitness", "dumbbell"),
    ("security", "shield"),
    ("cctv", "cctv"),
    ("elevator", "arrow-up-down"),
    ("wifi", "wifi"),
    ("internet", "wifi"),
    ("sea view", "waves"),
    ("mountain view", "mountain"),
    ("sunset view", "sunset"),
    ("bbq", "flame"),
    ("barbecue", "flame"),
    ("laundry", "shirt"),
    ("furnished", "armchair"),
    ("fire alarm", "bell-ring"),
    ("fire place", "flame"),
    ("jacuzzi", "waves"),
    ("home theater", "tv"),
    ("roof top", "sun"),
    ("private beach", "umbrella"),
    ("electric range", "zap"),
];

const DEFAULT_ICON: &str = "check";

/// A listed amenity with its display icon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amenity {
    pub name: String,
    pub icon: String,
}

impl Amenity {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let icon = icon_for(&name).to_string();
        Self { name, icon }
    }
}

/// Icon for an amenity name, matched loosely in either direction.
pub fn icon_for(amenity: &str) -> &'static str {
    let needle = amenity.trim().to_lowercase();
    if needle.is_empty() {
        return DEFAULT_ICON;
    }
    AMENITY_ICONS
        .iter()
        .find(|(key, _)| needle.contains(key) || key.contains(needle.as_str()))
        .map(|(_, icon)| *icon)
        .unwrap_or(DEFAULT_ICON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_amenities() {
        assert_eq!(icon_for("Private Pool"), "waves");
        assert_eq!(icon_for("  Covered parking "), "car");
        assert_eq!(icon_for("Fully furnished"), "armchair");
        assert_eq!(icon_for("gym"), "dumbbell");
    }

    #[test]
    fn unknown_and_empty_fall_back() {
        assert_eq!(icon_for("Helipad"), "check");
        assert_eq!(icon_for(""), "check");
    }

    #[test]
    fn amenity_carries_icon() {
        let a = Amenity::new("Sea view");
        assert_eq!(a.icon, "waves");
        assert_eq!(a.name, "Sea view");
    }
}
