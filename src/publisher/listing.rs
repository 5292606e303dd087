//! Published listing record, built from a finished session.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amenities::Amenity;
use crate::error::PublishError;
use crate::sessions::model::{PoiScores, Session};

/// Listings carry at most this many photos.
pub const MAX_LISTING_IMAGES: usize = 10;

const SHORT_DESCRIPTION_MAX: usize = 200;

pub const DEFAULT_CURRENCY: &str = "THB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingType {
    ForSale,
    ForRent,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForSale => "FOR_SALE",
            Self::ForRent => "FOR_RENT",
        }
    }

    fn infer(text: &str) -> Self {
        let text = text.to_lowercase();
        if ["for rent", "rental", "per month", "monthly rent"]
            .iter()
            .any(|k| text.contains(k))
        {
            Self::ForRent
        } else {
            Self::ForSale
        }
    }
}

impl std::str::FromStr for ListingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOR_SALE" => Ok(Self::ForSale),
            "FOR_RENT" => Ok(Self::ForRent),
            other => Err(format!("unknown listing type: {other}")),
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingCategory {
    LuxuryVilla,
    Apartment,
    ResidentialHome,
    OfficeSpaces,
}

impl ListingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LuxuryVilla => "LUXURY_VILLA",
            Self::Apartment => "APARTMENT",
            Self::ResidentialHome => "RESIDENTIAL_HOME",
            Self::OfficeSpaces => "OFFICE_SPACES",
        }
    }

    /// Category from the detected property type, falling back to the title.
    fn infer(property_type: Option<&str>, title: &str) -> Self {
        let text = format!("{} {}", property_type.unwrap_or_default(), title).to_lowercase();
        if text.contains("villa") {
            Self::LuxuryVilla
        } else if ["condo", "apartment", "flat", "studio"]
            .iter()
            .any(|k| text.contains(k))
        {
            Self::Apartment
        } else if ["office", "commercial", "shophouse"]
            .iter()
            .any(|k| text.contains(k))
        {
            Self::OfficeSpaces
        } else {
            Self::ResidentialHome
        }
    }
}

impl std::str::FromStr for ListingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LUXURY_VILLA" => Ok(Self::LuxuryVilla),
            "APARTMENT" => Ok(Self::Apartment),
            "RESIDENTIAL_HOME" => Ok(Self::ResidentialHome),
            "OFFICE_SPACES" => Ok(Self::OfficeSpaces),
            other => Err(format!("unknown listing category: {other}")),
        }
    }
}

impl fmt::Display for ListingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property listing as stored for the property site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub id: String,
    pub session_id: Uuid,
    pub title: String,
    pub short_description: String,
    pub content: String,
    pub rich_text: String,
    pub price: Option<Decimal>,
    pub currency: String,
    pub listing_type: ListingType,
    pub category: ListingCategory,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub district: Option<String>,
    pub images: Vec<String>,
    pub amenities: Vec<Amenity>,
    pub beds: Option<u32>,
    pub baths: Option<f32>,
    pub poi_scores: Option<PoiScores>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Build a listing from a session that has finished generation.
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Result<Self, PublishError> {
        let incomplete = |field: &str| PublishError::Incomplete {
            session_id: session.id,
            field: field.to_string(),
        };

        let content = session
            .generated_content
            .as_ref()
            .ok_or_else(|| incomplete("generated content"))?;
        let location = session.location.as_ref().ok_or_else(|| incomplete("location"))?;
        if session.images.is_empty() {
            return Err(incomplete("images"));
        }

        let features = session.detected_features.as_ref();
        let record = Self {
            id: Uuid::new_v4().to_string(),
            session_id: session.id,
            title: content.title.trim().to_string(),
            short_description: short_description(&content.description),
            content: content.description.trim().to_string(),
            rich_text: content.rich_text.clone(),
            price: content.suggested_price,
            currency: DEFAULT_CURRENCY.to_string(),
            listing_type: ListingType::infer(&format!("{} {}", content.title, content.description)),
            category: ListingCategory::infer(
                features.and_then(|f| f.property_type.as_deref()),
                &content.title,
            ),
            location: location.label(),
            latitude: location.latitude,
            longitude: location.longitude,
            district: location.district.clone(),
            images: session.images.iter().take(MAX_LISTING_IMAGES).cloned().collect(),
            amenities: features
                .map(|f| f.amenities.iter().map(Amenity::new).collect())
                .unwrap_or_default(),
            beds: features.and_then(|f| f.bedrooms),
            baths: features.and_then(|f| f.bathrooms),
            poi_scores: session.poi_scores.clone(),
            created_by: session.sender_id.clone(),
            created_at: now,
        };
        record.validate()?;
        Ok(record)
    }

    /// Required fields and value ranges.
    pub fn validate(&self) -> Result<(), PublishError> {
        if self.title.is_empty() {
            return Err(PublishError::Invalid("title is empty".into()));
        }
        if self.content.is_empty() {
            return Err(PublishError::Invalid("content is empty".into()));
        }
        if self.location.trim().is_empty() {
            return Err(PublishError::Invalid("location is empty".into()));
        }
        if self.images.is_empty() {
            return Err(PublishError::Invalid("at least one image is required".into()));
        }
        if self.images.len() > MAX_LISTING_IMAGES {
            return Err(PublishError::Invalid(format!(
                "{} images exceeds the limit of {MAX_LISTING_IMAGES}",
                self.images.len()
            )));
        }
        if self.short_description.chars().count() > SHORT_DESCRIPTION_MAX {
            return Err(PublishError::Invalid("short description too long".into()));
        }
        if self.price.is_some_and(|p| p.is_sign_negative()) {
            return Err(PublishError::Invalid("price is negative".into()));
        }
        Ok(())
    }
}

/// First sentence or two of `description`, cut to the short-description limit.
fn short_description(description: &str) -> String {
    let text = description.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= SHORT_DESCRIPTION_MAX {
        return text;
    }
    let cut: String = text.chars().take(SHORT_DESCRIPTION_MAX - 1).collect();
    let cut = match cut.rfind(' ') {
        Some(idx) if idx > SHORT_DESCRIPTION_MAX / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end_matches([',', '.', ';', ' ']))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::message::GeoPin;
    use crate::sessions::model::{DetectedFeatures, GeneratedContent, Initiator, Location};
    use rust_decimal_macros::dec;

    fn ready_session() -> Session {
        let now = Utc::now();
        let mut s = Session::new(
            "whatsapp:+6611",
            Initiator {
                channel_user_id: "whatsapp:+6611".into(),
                display_name: None,
            },
            std::time::Duration::from_secs(3600),
            now,
        );
        s.images = (1..=12).map(|i| format!("https://img/{i}.jpg")).collect();
        s.location = Some(Location::from_pin(&GeoPin {
            latitude: 7.77,
            longitude: 98.32,
            name: Some("Rawai".into()),
            address: None,
        }));
        s.generated_content = Some(GeneratedContent {
            title: "Pool Villa with Sea View".into(),
            description: "A bright three-bedroom villa.".into(),
            rich_text: "<p>A bright three-bedroom villa.</p>".into(),
            suggested_price: Some(dec!(34800000)),
        });
        s.detected_features = Some(DetectedFeatures {
            property_type: Some("villa".into()),
            bedrooms: Some(3),
            bathrooms: Some(2.5),
            amenities: vec!["Private pool".into(), "Parking".into(), "Helipad".into()],
            notes: vec![],
        });
        s
    }

    #[test]
    fn builds_from_session() {
        let record = ListingRecord::from_session(&ready_session(), Utc::now()).unwrap();
        assert_eq!(record.category, ListingCategory::LuxuryVilla);
        assert_eq!(record.listing_type, ListingType::ForSale);
        assert_eq!(record.currency, "THB");
        assert_eq!(record.images.len(), MAX_LISTING_IMAGES);
        assert_eq!(record.images[0], "https://img/1.jpg");
        assert_eq!(record.district.as_deref(), Some("Rawai"));
        assert_eq!(record.beds, Some(3));
        let icons: Vec<_> = record.amenities.iter().map(|a| a.icon.as_str()).collect();
        assert_eq!(icons, vec!["waves", "car", "check"]);
    }

    #[test]
    fn missing_content_is_incomplete() {
        let mut s = ready_session();
        s.generated_content = None;
        assert!(matches!(
            ListingRecord::from_session(&s, Utc::now()),
            Err(PublishError::Incomplete { .. })
        ));
    }

    #[test]
    fn empty_title_is_invalid() {
        let mut s = ready_session();
        if let Some(c) = s.generated_content.as_mut() {
            c.title = "   ".into();
        }
        assert!(matches!(
            ListingRecord::from_session(&s, Utc::now()),
            Err(PublishError::Invalid(_))
        ));
    }

    #[test]
    fn category_inference() {
        assert_eq!(
            ListingCategory::infer(None, "Modern condo near Patong"),
            ListingCategory::Apartment
        );
        assert_eq!(
            ListingCategory::infer(Some("commercial"), "Unit"),
            ListingCategory::OfficeSpaces
        );
        assert_eq!(
            ListingCategory::infer(None, "Family townhouse"),
            ListingCategory::ResidentialHome
        );
    }

    #[test]
    fn rental_wording_sets_listing_type() {
        assert_eq!(ListingType::infer("Villa for rent in Kata"), ListingType::ForRent);
        assert_eq!(ListingType::infer("Villa in Kata"), ListingType::ForSale);
    }

    #[test]
    fn short_description_is_capped() {
        let long = "word ".repeat(100);
        let short = short_description(&long);
        assert!(short.chars().count() <= SHORT_DESCRIPTION_MAX);
        assert!(short.ends_with('…'));
        assert_eq!(short_description("  Two   spaces. "), "Two spaces.");
    }
}
