//! Modules d'export

pub mod geojson;

pub use geojson::{conflict_features, export_to_geojson, feature_collection, parcel_feature, GeoFeature};
