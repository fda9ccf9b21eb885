use std::collections::BTreeMap;

use itertools::Itertools as _;
use tracing::debug;
use utoipa::OpenApi;
use utoipa::openapi::HttpMethod;
use utoipa::openapi::PathItem;
use utoipa::openapi::RefOr;
use utoipa::openapi::Schema;
use utoipa::openapi::path::Operation;
use utoipa::openapi::path::PathItemBuilder;

use crate::error::ERROR_DEFINITIONS;
use crate::error::ErrorDefinition;
use crate::views::service_router;

fn path_item_operations(path_item: PathItem) -> BTreeMap<HttpMethod, Operation> {
    let mut operations = BTreeMap::new();
    operations.extend(path_item.get.map(|op| (HttpMethod::Get, op)));
    operations.extend(path_item.put.map(|op| (HttpMethod::Put, op)));
    operations.extend(path_item.post.map(|op| (HttpMethod::Post, op)));
    operations.extend(path_item.delete.map(|op| (HttpMethod::Delete, op)));
    operations.extend(path_item.options.map(|op| (HttpMethod::Options, op)));
    operations.extend(path_item.head.map(|op| (HttpMethod::Head, op)));
    operations.extend(path_item.patch.map(|op| (HttpMethod::Patch, op)));
    operations.extend(path_item.trace.map(|op| (HttpMethod::Trace, op)));
    operations
}

fn path_item_operations_mut(path_item: &mut PathItem) -> Vec<&mut Operation> {
    let mut operations = Vec::new();
    operations.extend(path_item.get.as_mut());
    operations.extend(path_item.put.as_mut());
    operations.extend(path_item.post.as_mut());
    operations.extend(path_item.delete.as_mut());
    operations.extend(path_item.options.as_mut());
    operations.extend(path_item.head.as_mut());
    operations.extend(path_item.patch.as_mut());
    operations.extend(path_item.trace.as_mut());
    operations
}

fn merge_path_items(mut a: PathItem, b: PathItem) -> PathItem {
    a.merge_operations(b.clone());
    let operations = path_item_operations(a.clone());
    let mut builder = PathItemBuilder::new()
        .summary(a.summary.or(b.summary))
        .description(a.description.or(b.description))
        .parameters(match (a.parameters, b.parameters) {
            (Some(a), Some(b)) => Some(a.into_iter().chain(b).collect()),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        })
        .servers(match (a.servers, b.servers) {
            (Some(a), Some(b)) => Some(a.into_iter().chain(b).collect()),
            (Some(s), None) | (None, Some(s)) => Some(s),
            (None, None) => None,
        });
    for (method, operation) in operations {
        builder = builder.operation(method, operation);
    }
    builder.build()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "OreFox",
        description = "Projects and documents of mining and exploration teams",
        license(name = "LGPL", url = "https://www.gnu.org/licenses/lgpl-3.0.html"),
    ),
    components(schemas(crate::error::InternalError))
)]
pub struct OpenApiRoot;

impl OpenApiRoot {
    fn error_context_to_openapi_object(error_def: &ErrorDefinition) -> utoipa::openapi::Object {
        let mut context = utoipa::openapi::Object::new();
        for prop_name in error_def.get_context().keys().sorted() {
            let prop_type = &error_def.get_context()[prop_name];
            let utoipa_type = match prop_type.as_ref() {
                "bool" => utoipa::openapi::schema::Type::Boolean,
                "isize" | "i8" | "i16" | "i32" | "i64" | "usize" | "u8" | "u16" | "u32" | "u64" => {
                    utoipa::openapi::schema::Type::Integer
                }
                "f8" | "f16" | "f32" | "f64" => utoipa::openapi::schema::Type::Number,
                "Vec" => utoipa::openapi::schema::Type::Array,
                "char" | "String" => utoipa::openapi::schema::Type::String,
                _ => utoipa::openapi::schema::Type::Object,
            };
            context.properties.insert(
                prop_name.clone(),
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::SchemaType::Type(utoipa_type))
                    .into(),
            );
            context.required.push(prop_name.clone());
        }
        context
    }

    /// One schema per registered error, and `OrefoxError` as their union
    fn add_errors_in_schema(openapi: &mut utoipa::openapi::OpenApi) {
        let mut orefox_error = utoipa::openapi::OneOf::new();
        orefox_error.description = Some("Every error returned by the service".to_string());
        orefox_error.discriminator = Some(utoipa::openapi::Discriminator::new("type"));

        // the link order of the registered errors is not stable
        let errors = ERROR_DEFINITIONS
            .iter()
            .sorted_by(|a, b| a.namespace.cmp(b.namespace).then(a.id.cmp(b.id)));
        let schemas = &mut openapi.components.get_or_insert_with(Default::default).schemas;
        for error_def in errors {
            schemas.insert(
                error_def.get_schema_name(),
                utoipa::openapi::ObjectBuilder::new()
                    .property(
                        "type",
                        utoipa::openapi::ObjectBuilder::new()
                            .schema_type(utoipa::openapi::schema::SchemaType::Type(
                                utoipa::openapi::schema::Type::String,
                            ))
                            .enum_values(Some([error_def.id])),
                    )
                    .property(
                        "status",
                        utoipa::openapi::ObjectBuilder::new()
                            .schema_type(utoipa::openapi::schema::SchemaType::Type(
                                utoipa::openapi::schema::Type::Integer,
                            ))
                            .enum_values(Some([error_def.status])),
                    )
                    .property(
                        "message",
                        utoipa::openapi::ObjectBuilder::new().schema_type(
                            utoipa::openapi::schema::SchemaType::Type(
                                utoipa::openapi::schema::Type::String,
                            ),
                        ),
                    )
                    .property("context", Self::error_context_to_openapi_object(error_def))
                    .required("type")
                    .required("status")
                    .required("message")
                    .into(),
            );

            orefox_error.items.push(
                utoipa::openapi::Ref::new(format!(
                    "#/components/schemas/{}",
                    error_def.get_schema_name()
                ))
                .into(),
            );
        }

        schemas.insert(
            String::from("OrefoxError"),
            utoipa::openapi::OneOfBuilder::from(orefox_error).into(),
        );
    }

    fn insert_routes(openapi: &mut utoipa::openapi::OpenApi) -> Vec<(String, RefOr<Schema>)> {
        let mut all_schemas = Vec::new();
        for route in service_router().routes {
            debug!(path = %route.path, "documenting route");
            let (path_item, schemas) = route.path_item();
            // handlers of the same path are mounted one method at a time
            let path_item = match openapi.paths.paths.remove(&route.path) {
                Some(existing_path_item) => merge_path_items(existing_path_item, path_item),
                None => path_item,
            };
            openapi.paths.paths.insert(route.path, path_item);
            all_schemas.extend(schemas);
        }
        all_schemas
    }

    fn insert_schemas(
        openapi: &mut utoipa::openapi::OpenApi,
        routes_schemas: Vec<(String, RefOr<Schema>)>,
    ) {
        let schemas = &mut openapi.components.get_or_insert_with(Default::default).schemas;
        for (name, schema) in routes_schemas {
            schemas.entry(name).or_insert(schema);
        }
    }

    // operation ids default to the handler names, which are not unique (get, list...)
    fn remove_operation_id(openapi: &mut utoipa::openapi::OpenApi) {
        for (_, endpoint) in openapi.paths.paths.iter_mut() {
            for operation in path_item_operations_mut(endpoint) {
                operation.operation_id = None;
            }
        }
    }

    pub fn build_openapi() -> utoipa::openapi::OpenApi {
        let mut openapi = OpenApiRoot::openapi();
        let routes_schemas = Self::insert_routes(&mut openapi);
        Self::insert_schemas(&mut openapi, routes_schemas);
        Self::add_errors_in_schema(&mut openapi);
        Self::remove_operation_id(&mut openapi);
        openapi
    }
}
