//! OpenAPI document derived from the registered shapes.

use serde_json::{json, Map, Value};

use crate::error::ApiResult;
use crate::formats::FormatRegistry;
use crate::model::{Registry, Variant};

pub fn openapi(registry: &Registry, formats: &FormatRegistry) -> ApiResult<Value> {
    let mut paths = Map::new();
    let mut schemas = Map::new();
    let mut tags = Vec::new();

    schemas.insert("Error".into(), error_schema());

    for def in registry.routed() {
        let create = registry.shape(def.kind, Variant::Create)?;
        let read = registry.shape(def.kind, Variant::Read)?;
        let create_ref = json!({ "$ref": format!("#/components/schemas/{}", create.name()) });
        let read_ref = json!({ "$ref": format!("#/components/schemas/{}", read.name()) });
        schemas.insert(create.name(), create.json_schema());
        schemas.insert(read.name(), read.json_schema());
        tags.push(json!({ "name": def.plural, "description": def.description }));

        let selectors = formats.selectors(def.kind);
        let list_params = json!([
            { "name": "offset", "in": "query", "schema": { "type": "integer", "minimum": 0, "default": 0 } },
            { "name": "limit", "in": "query", "schema": { "type": "integer", "minimum": 0 } },
            schema_param(&selectors),
        ]);
        let list = json!({
            "tags": [def.plural],
            "summary": format!("List {}", def.plural),
            "parameters": list_params,
            "responses": {
                "200": ok(json!({ "type": "array", "items": read_ref })),
                "400": error("Unsupported schema"),
            }
        });
        let identifier_param = json!({ "name": "identifier", "in": "path", "required": true, "schema": { "type": "string" } });
        let platform_param = json!({ "name": "platform", "in": "path", "required": true, "schema": { "type": "string" } });

        paths.insert(
            format!("/{}/", def.plural),
            json!({
                "get": list,
                "post": {
                    "tags": [def.plural],
                    "summary": format!("Create a {}", def.kind),
                    "requestBody": { "required": true, "content": { "application/json": { "schema": create_ref } } },
                    "responses": {
                        "200": ok(read_ref.clone()),
                        "400": error("Invalid payload"),
                        "401": error("Missing principal"),
                        "403": error("Missing write role"),
                        "404": error("Referenced resources not found"),
                        "409": error("Platform identifier already taken"),
                    }
                }
            }),
        );
        paths.insert(
            format!("/{}/{{identifier}}", def.plural),
            json!({
                "parameters": [identifier_param],
                "get": {
                    "tags": [def.plural],
                    "summary": format!("Get a {}", def.kind),
                    "parameters": [schema_param(&selectors)],
                    "responses": { "200": ok(read_ref.clone()), "404": error("Not found") }
                },
                "put": {
                    "tags": [def.plural],
                    "summary": format!("Replace a {}", def.kind),
                    "requestBody": { "required": true, "content": { "application/json": { "schema": create_ref } } },
                    "responses": {
                        "200": ok(read_ref.clone()),
                        "400": error("Invalid payload"),
                        "404": error("Not found"),
                        "409": error("Platform identifier already taken"),
                    }
                },
                "delete": {
                    "tags": [def.plural],
                    "summary": format!("Delete a {}", def.kind),
                    "responses": {
                        "200": ok(json!({ "type": "object" })),
                        "400": error("Still referenced by another resource"),
                        "404": error("Not found"),
                    }
                }
            }),
        );
        paths.insert(
            format!("/platforms/{{platform}}/{}/", def.plural),
            json!({
                "parameters": [platform_param],
                "get": list,
            }),
        );
        paths.insert(
            format!("/platforms/{{platform}}/{}/{{identifier}}", def.plural),
            json!({
                "parameters": [platform_param, identifier_param],
                "get": {
                    "tags": [def.plural],
                    "summary": format!("Get a {} by its platform identifier", def.kind),
                    "parameters": [schema_param(&selectors)],
                    "responses": { "200": ok(read_ref), "404": error("Not found") }
                }
            }),
        );
        paths.insert(
            format!("/counts/{}/", def.plural),
            json!({
                "get": {
                    "tags": [def.plural],
                    "summary": format!("Count {}", def.plural),
                    "parameters": [{ "name": "detailed", "in": "query", "schema": { "type": "boolean" } }],
                    "responses": { "200": ok(json!({})) }
                }
            }),
        );
    }

    // Owned kinds only appear nested, but their shapes are useful on their own.
    for kind in registry
        .resources()
        .filter(|def| !def.is_shared())
        .map(|def| def.kind)
    {
        for variant in [Variant::Create, Variant::Read] {
            let shape = registry.shape(kind, variant)?;
            schemas.insert(shape.name(), shape.json_schema());
        }
    }

    Ok(json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Metadata Catalog API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "CRUD endpoints for catalogued resources with shared vocabularies and cross-platform linking."
        },
        "servers": [{ "url": "/", "description": "Current server" }],
        "tags": tags,
        "paths": paths,
        "components": { "schemas": schemas }
    }))
}

fn schema_param(selectors: &[String]) -> Value {
    json!({
        "name": "schema",
        "in": "query",
        "schema": { "type": "string", "enum": selectors, "default": "native" }
    })
}

fn ok(schema: Value) -> Value {
    json!({ "description": "OK", "content": { "application/json": { "schema": schema } } })
}

fn error(description: &str) -> Value {
    json!({
        "description": description,
        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } }
    })
}

fn error_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "error": { "type": "string" },
            "details": { "type": "object" }
        },
        "required": ["error"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_covers_every_routed_kind() {
        let registry = crate::catalog::registry().unwrap();
        let document = openapi(&registry, &crate::catalog::formats()).unwrap();

        for plural in ["datasets", "publications", "organisations", "events"] {
            assert!(document["paths"][format!("/{plural}/")]["post"].is_object());
            assert!(document["paths"][format!("/{plural}/{{identifier}}")]["delete"].is_object());
        }
        let schemas = &document["components"]["schemas"];
        assert!(schemas["DatasetCreate"].is_object());
        assert!(schemas["DistributionRead"].is_object());
        assert_eq!(
            document["paths"]["/datasets/"]["get"]["parameters"][2]["schema"]["enum"],
            json!(["native", "dcat-ap"])
        );
    }
}
