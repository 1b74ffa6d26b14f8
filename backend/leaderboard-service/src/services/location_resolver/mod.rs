// ============================================
// Location Resolver (地點解析器)
// ============================================
//
// Classifies a free-text profile location into a canonical location and
// optionally a city. Tiers are evaluated in order and the first hit wins:
// 1. Exact: canonical name or unique alias equals the input
// 2. Containment: input contains a canonical name or unique alias; the
//    location's cities are then searched by name and alias
// 3. Fuzzy city: input contains the name or an alias of any city whose
//    name is longer than FUZZY_CITY_MIN_LEN
//
// Matching is case-insensitive. No match is a normal outcome.

use crate::dimensions::{DimensionRegistry, Location};
use crate::models::Resolution;

/// Cities with names this short or shorter only match through a location
pub const FUZZY_CITY_MIN_LEN: usize = 5;

type Tier = fn(&DimensionRegistry, &str) -> Option<Resolution>;

const TIERS: [Tier; 3] = [exact_tier, containment_tier, fuzzy_city_tier];

pub struct LocationResolver<'a> {
    registry: &'a DimensionRegistry,
}

impl<'a> LocationResolver<'a> {
    pub fn new(registry: &'a DimensionRegistry) -> Self {
        Self { registry }
    }

    /// Resolve free text into a canonical location/city pair
    pub fn resolve(&self, input: &str) -> Resolution {
        let text = input.trim().to_lowercase();
        if text.is_empty() {
            return Resolution::default();
        }

        TIERS
            .iter()
            .find_map(|tier| tier(self.registry, &text))
            .unwrap_or_default()
    }
}

fn exact_tier(registry: &DimensionRegistry, text: &str) -> Option<Resolution> {
    registry
        .locations()
        .iter()
        .find(|location| {
            text == location.key()
                || location
                    .aliases
                    .iter()
                    .any(|alias| alias.unique && text == alias.key())
        })
        .map(|location| Resolution::location(&location.name))
}

fn containment_tier(registry: &DimensionRegistry, text: &str) -> Option<Resolution> {
    let location = registry.locations().iter().find(|location| {
        text.contains(location.key())
            || location
                .aliases
                .iter()
                .any(|alias| alias.unique && text.contains(alias.key()))
    })?;

    Some(match find_city(location, text, 0) {
        Some(city) => Resolution::city(&location.name, &city.name),
        None => Resolution::location(&location.name),
    })
}

fn fuzzy_city_tier(registry: &DimensionRegistry, text: &str) -> Option<Resolution> {
    registry.locations().iter().find_map(|location| {
        find_city(location, text, FUZZY_CITY_MIN_LEN)
            .map(|city| Resolution::city(&location.name, &city.name))
    })
}

/// First city (in registry order) whose name or any alias occurs in `text`.
/// Cities whose name is not longer than `min_len` characters are skipped.
fn find_city<'l>(location: &'l Location, text: &str, min_len: usize) -> Option<&'l Location> {
    location.cities.iter().find(|city| {
        city.name.chars().count() > min_len
            && (text.contains(city.key())
                || city.aliases.iter().any(|alias| text.contains(alias.key())))
    })
}
