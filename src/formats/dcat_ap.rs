//! DCAT-AP (JSON-LD) rendering of datasets.

use serde_json::{json, Map, Value};

pub const SELECTOR: &str = "dcat-ap";

fn context() -> Value {
    json!({
        "dcat": "http://www.w3.org/ns/dcat#",
        "dct": "http://purl.org/dc/terms/",
        "foaf": "http://xmlns.com/foaf/0.1/",
        "spdx": "http://spdx.org/rdf/terms#",
        "owl": "http://www.w3.org/2002/07/owl#",
        "xsd": "http://www.w3.org/2001/XMLSchema#",
    })
}

/// Convert a dataset's native read representation to a DCAT-AP graph.
pub fn dataset_to_dcat(native: &Map<String, Value>) -> Value {
    let identifier = native.get("identifier").cloned().unwrap_or(Value::Null);
    let dataset_id = format!("_:dataset_{}", render_id(&identifier));

    let mut dataset = Map::new();
    dataset.insert("@id".into(), json!(dataset_id));
    dataset.insert("@type".into(), json!("dcat:Dataset"));
    dataset.insert("dct:identifier".into(), identifier);
    copy(native, "name", &mut dataset, "dct:title");
    copy(native, "description", &mut dataset, "dct:description");
    copy(native, "version", &mut dataset, "owl:versionInfo");
    copy(native, "same_as", &mut dataset, "dcat:landingPage");
    copy(native, "keywords", &mut dataset, "dcat:keyword");
    copy(native, "license", &mut dataset, "dct:license");
    if let Some(published) = native.get("date_published").and_then(Value::as_str) {
        dataset.insert(
            "dct:issued".into(),
            json!({ "@type": "xsd:dateTime", "@value": published }),
        );
    }

    let mut graph = Vec::new();
    let mut distribution_ids = Vec::new();
    let distributions = native
        .get("distributions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for (index, item) in distributions.iter().enumerate() {
        let Some(source) = item.as_object() else {
            continue;
        };
        let id = format!("{dataset_id}_distribution_{index}");
        distribution_ids.push(json!({ "@id": id }));
        graph.push(distribution(&id, source));
    }
    if !distribution_ids.is_empty() {
        dataset.insert("dcat:distribution".into(), Value::Array(distribution_ids));
    }

    graph.insert(0, Value::Object(dataset));
    json!({ "@context": context(), "@graph": graph })
}

fn distribution(id: &str, source: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    out.insert("@id".into(), json!(id));
    out.insert("@type".into(), json!("dcat:Distribution"));
    copy(source, "content_url", &mut out, "dcat:accessURL");
    copy(source, "name", &mut out, "dct:title");
    copy(source, "encoding_format", &mut out, "dcat:mediaType");
    if let Some(kb) = source.get("content_size_kb").and_then(Value::as_i64) {
        out.insert(
            "dcat:byteSize".into(),
            json!({ "@type": "xsd:decimal", "@value": kb * 1024 }),
        );
    }
    let checksums: Vec<Value> = source
        .get("checksums")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|c| {
                    json!({
                        "@type": "spdx:Checksum",
                        "spdx:algorithm": c.get("algorithm"),
                        "spdx:checksumValue": c.get("value"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if !checksums.is_empty() {
        out.insert("spdx:checksum".into(), Value::Array(checksums));
    }
    Value::Object(out)
}

fn copy(source: &Map<String, Value>, from: &str, target: &mut Map<String, Value>, to: &str) {
    if let Some(value) = source.get(from).filter(|v| !v.is_null()) {
        target.insert(to.to_string(), value.clone());
    }
}

fn render_id(identifier: &Value) -> String {
    match identifier {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => "unsaved".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_graph() {
        let native = json!({
            "identifier": 7,
            "name": "iris",
            "keywords": ["flowers"],
            "license": "CC-BY-4.0",
            "date_published": "2024-01-31",
            "distributions": [{
                "identifier": 8,
                "content_url": "https://x/iris.csv",
                "content_size_kb": 4,
                "checksums": [{"identifier": 9, "algorithm": "md5", "value": "abc"}]
            }]
        });
        let out = dataset_to_dcat(native.as_object().unwrap());
        let graph = out["@graph"].as_array().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0]["@type"], json!("dcat:Dataset"));
        assert_eq!(graph[0]["dct:title"], json!("iris"));
        assert_eq!(graph[0]["dcat:keyword"], json!(["flowers"]));
        assert_eq!(graph[0]["dcat:distribution"][0]["@id"], graph[1]["@id"]);
        assert_eq!(graph[1]["dcat:byteSize"]["@value"], json!(4096));
        assert_eq!(graph[1]["spdx:checksum"][0]["spdx:checksumValue"], json!("abc"));
    }

    #[test]
    fn test_dataset_without_distributions() {
        let native = json!({"identifier": 1, "name": "empty"});
        let out = dataset_to_dcat(native.as_object().unwrap());
        let graph = out["@graph"].as_array().unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph[0].get("dcat:distribution").is_none());
    }
}
