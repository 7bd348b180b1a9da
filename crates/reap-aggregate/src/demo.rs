//! Placeholder listings for searches where no real source answered.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reap_core::{Property, PropertyMetadata, PropertyType, SearchCriteria};

pub const DEMO_SOURCE: &str = "demo-generator";
pub const DEFAULT_DEMO_COUNT: usize = 10;

const STREETS: [&str; 12] = [
    "Oak", "Maple", "Cedar", "Elm", "Pine", "Walnut", "Willow", "Hickory", "Birch", "Lincoln", "Washington",
    "Park",
];
const SUFFIXES: [&str; 6] = ["St", "Ave", "Dr", "Ln", "Ct", "Rd"];
const BATHS: [f64; 5] = [1.0, 1.5, 2.0, 2.5, 3.0];
const TYPES: [PropertyType; 6] = [
    PropertyType::SingleFamily,
    PropertyType::SingleFamily,
    PropertyType::SingleFamily,
    PropertyType::Townhouse,
    PropertyType::Condo,
    PropertyType::Duplex,
];

#[derive(Debug, Clone, Copy)]
pub struct DemoSynthesizer {
    pub count: usize,
    /// Fixed seed for reproducible output; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for DemoSynthesizer {
    fn default() -> Self {
        Self {
            count: DEFAULT_DEMO_COUNT,
            seed: None,
        }
    }
}

impl DemoSynthesizer {
    pub fn new(count: usize) -> Self {
        Self { count, seed: None }
    }

    pub fn seeded(count: usize, seed: u64) -> Self {
        Self {
            count,
            seed: Some(seed),
        }
    }

    pub fn synthesize(&self, criteria: &SearchCriteria) -> Vec<Property> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let min_price = criteria.min_price.filter(|v| v.is_finite()).unwrap_or(0.0);
        let max_price = criteria
            .max_price
            .filter(|v| v.is_finite())
            .unwrap_or(f64::MAX)
            .max(min_price);

        (0..self.count)
            .map(|i| {
                // Disjoint house-number bands keep addresses unique within a batch.
                let number = 100 + i * 40 + rng.gen_range(0..30);
                let street = STREETS.choose(&mut rng).copied().unwrap_or("Main");
                let suffix = SUFFIXES.choose(&mut rng).copied().unwrap_or("St");
                let bedrooms = rng.gen_range(2..=5u32).max(criteria.min_beds.unwrap_or(0));
                let square_feet = rng.gen_range(900..=3200u32);
                let per_sqft = rng.gen_range(90.0..220.0);
                let price = ((f64::from(square_feet) * per_sqft / 1000.0).round() * 1000.0)
                    .clamp(min_price, max_price);
                let property_type = criteria
                    .property_type
                    .unwrap_or_else(|| TYPES.choose(&mut rng).copied().unwrap_or_default());

                Property {
                    address: format!("{number} {street} {suffix}"),
                    city: criteria.city_or_empty().to_string(),
                    state: criteria.state_or_empty().to_string(),
                    zip_code: criteria.zip_code.clone().unwrap_or_default(),
                    bedrooms: Some(bedrooms),
                    bathrooms: BATHS.choose(&mut rng).copied(),
                    square_feet: Some(square_feet),
                    year_built: Some(rng.gen_range(1950..=2020)),
                    property_type,
                    price: Some(price),
                    estimated_value: Some(price),
                    estimated_rent: Some((price * 0.008 / 5.0).round() * 5.0),
                    source: DEMO_SOURCE.to_string(),
                    external_id: Some(format!("demo-{}", i + 1)),
                    description: Some("Sample listing shown because no live source returned results.".into()),
                    metadata: PropertyMetadata {
                        is_demo: true,
                        days_on_market: Some(rng.gen_range(1..=120)),
                        ..Default::default()
                    },
                    ..Default::default()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_record_is_flagged_and_distinct() {
        let props = DemoSynthesizer::seeded(10, 7).synthesize(&SearchCriteria::for_city("Nowhereville", "ZZ"));
        assert_eq!(props.len(), 10);
        assert!(props.iter().all(|p| p.metadata.is_demo && p.source.starts_with("demo-")));
        assert!(props.iter().all(|p| p.city == "Nowhereville" && p.state == "ZZ"));
        let keys: HashSet<_> = props.iter().filter_map(Property::key).collect();
        assert_eq!(keys.len(), 10);
    }

    #[test]
    fn seeded_output_is_reproducible() {
        let criteria = SearchCriteria::for_city("Austin", "TX");
        let a = DemoSynthesizer::seeded(5, 42).synthesize(&criteria);
        let b = DemoSynthesizer::seeded(5, 42).synthesize(&criteria);
        assert_eq!(a, b);
    }

    #[test]
    fn attributes_respect_criteria() {
        let criteria = SearchCriteria {
            min_price: Some(150_000.0),
            max_price: Some(200_000.0),
            min_beds: Some(4),
            property_type: Some(PropertyType::Condo),
            ..SearchCriteria::for_city("Austin", "TX")
        };
        for p in DemoSynthesizer::seeded(20, 3).synthesize(&criteria) {
            let price = p.price.unwrap();
            assert!((150_000.0..=200_000.0).contains(&price), "{price}");
            assert!(p.bedrooms.unwrap() >= 4);
            assert_eq!(p.property_type, PropertyType::Condo);
            assert!(criteria.matches(&p));
        }
    }

    #[test]
    fn non_finite_bounds_are_ignored() {
        let criteria = SearchCriteria {
            min_price: Some(f64::NAN),
            max_price: Some(f64::INFINITY),
            ..SearchCriteria::for_city("Austin", "TX")
        };
        let props = DemoSynthesizer::seeded(5, 9).synthesize(&criteria);
        assert_eq!(props.len(), 5);
        assert!(props.iter().all(|p| p.price.is_some_and(f64::is_finite)));
    }
}
