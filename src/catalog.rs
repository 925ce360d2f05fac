//! Resource kinds served by this catalog.
//!
//! Each kind is declared once; create and read shapes, routes and the
//! OpenAPI document are all derived from these declarations.

use serde_json::json;

use crate::error::ApiResult;
use crate::formats::{dcat_ap, FormatRegistry};
use crate::model::{
    DataType, PropertyDef, Registry, RelationshipConfig, RelationshipDescriptor as R,
    ResourceDef, Vocabulary,
};

/// Kinds a citation, an author or a funder may point at.
const CITABLE: &[&str] = &["publication", "dataset"];

pub fn registry() -> ApiResult<Registry> {
    Registry::builder()
        .vocabulary(Vocabulary::new("keyword", "Free keywords describing a resource"))
        .vocabulary(Vocabulary::new("license", "License under which a resource is published"))
        .vocabulary(Vocabulary::new("alternate_name", "Alias of a resource"))
        .vocabulary(Vocabulary::new("business_category", "Market sector of an organisation"))
        .vocabulary(Vocabulary::new("event_mode", "Whether an event is online, offline or hybrid"))
        .resource(checksum())
        .resource(distribution())
        .resource(dataset())
        .resource(publication())
        .resource(organisation())
        .resource(event())
        .build()
}

pub fn formats() -> FormatRegistry {
    FormatRegistry::new().register("dataset", dcat_ap::SELECTOR, dcat_ap::dataset_to_dcat)
}

fn checksum() -> ResourceDef {
    ResourceDef::owned("checksum", "Checksum of a distribution")
        .property(
            PropertyDef::string("algorithm", 64)
                .required()
                .describe("The checksum algorithm", json!("sha256")),
        )
        .property(
            PropertyDef::string("value", 256)
                .required()
                .describe("The hexadecimal value of the checksum", json!("ba7816bf8f01cfea414140de5dae2223")),
        )
}

fn distribution() -> ResourceDef {
    ResourceDef::owned("distribution", "A downloadable form of a resource")
        .property(
            PropertyDef::string("content_url", 256)
                .required()
                .describe("Download location", json!("https://www.openml.org/data/download/61/iris.arff")),
        )
        .property(PropertyDef::new("content_size_kb", DataType::Integer))
        .property(PropertyDef::string("encoding_format", 256).describe("Media type", json!("text/csv")))
        .property(PropertyDef::string("name", 256))
        .property(PropertyDef::new("date_published", DataType::Date))
        .relationships(RelationshipConfig::new().with(
            "checksums",
            R::owned_many("checksum").describe("Checksums of the content", json!([])),
        ))
}

fn dataset() -> ResourceDef {
    ResourceDef::shared("dataset", "datasets", "A collection of data")
        .property(
            PropertyDef::string("name", 256)
                .required()
                .describe("Name of the dataset", json!("iris")),
        )
        .property(PropertyDef::string("description", 5000))
        .property(PropertyDef::new("date_published", DataType::Date))
        .property(PropertyDef::string("same_as", 256).describe("Canonical URL", json!("https://www.openml.org/d/61")))
        .property(PropertyDef::string("version", 150))
        .property(PropertyDef::new("is_accessible_for_free", DataType::Boolean))
        .relationships(
            RelationshipConfig::new()
                .with(
                    "keywords",
                    R::named_many("keyword").describe("Keywords", json!(["flowers", "botany"])),
                )
                .with(
                    "alternate_names",
                    R::named_many("alternate_name").describe("Aliases", json!(["Fisher's iris"])),
                )
                .with(
                    "license",
                    R::named_one("license", "license_identifier").describe("License", json!("CC-BY-4.0")),
                )
                .with(
                    "citations",
                    R::resource_many(&["publication"])
                        .describe("Publications citing this dataset", json!([1])),
                )
                .with("distributions", R::owned_many("distribution"))
                .with(
                    "media",
                    R::to_many().describe(
                        "Images and other media, stored as given",
                        json!([{ "content_url": "https://example.org/iris.png" }]),
                    ),
                ),
        )
}

fn publication() -> ResourceDef {
    ResourceDef::shared("publication", "publications", "A scholarly publication")
        .property(
            PropertyDef::string("title", 256)
                .required()
                .describe("Title", json!("The use of multiple measurements in taxonomic problems")),
        )
        .property(PropertyDef::string("description", 5000))
        .property(PropertyDef::new("date_published", DataType::Date))
        .property(PropertyDef::string("doi", 150))
        .relationships(
            RelationshipConfig::new()
                .with("keywords", R::named_many("keyword"))
                .with("license", R::named_one("license", "license_identifier"))
                .with(
                    "authors",
                    R::to_many().describe("Author names, stored as given", json!(["R. A. Fisher"])),
                )
                .with(
                    "cites",
                    R::resource_many(CITABLE).describe("Cited publications or datasets", json!([2])),
                )
                .with("distributions", R::owned_many("distribution")),
        )
}

fn organisation() -> ResourceDef {
    ResourceDef::shared("organisation", "organisations", "A company, institute or community")
        .property(
            PropertyDef::string("name", 256)
                .required()
                .describe("Name", json!("Eindhoven University of Technology")),
        )
        .property(PropertyDef::string("description", 5000))
        .property(PropertyDef::string("same_as", 256))
        .property(PropertyDef::new("date_founded", DataType::Date))
        .relationships(
            RelationshipConfig::new()
                .with(
                    "parent_organisation",
                    R::resource_one(&["organisation"], "parent_organisation_identifier")
                        .describe("Organisation this one belongs to", json!(1)),
                )
                .with("business_categories", R::named_many("business_category"))
                .with("keywords", R::named_many("keyword")),
        )
}

fn event() -> ResourceDef {
    ResourceDef::shared("event", "events", "A conference, workshop or meetup")
        .property(PropertyDef::string("name", 256).required())
        .property(PropertyDef::string("description", 5000))
        .property(PropertyDef::new("start_date", DataType::Date))
        .property(PropertyDef::new("end_date", DataType::Date))
        .relationships(
            RelationshipConfig::new()
                .with(
                    "organiser",
                    R::resource_one(&["organisation"], "organiser_identifier")
                        .describe("Organising organisation", json!(1)),
                )
                .with("mode", R::named_one("event_mode", "mode_identifier").describe("Mode", json!("online")))
                .with("keywords", R::named_many("keyword")),
        )
}
