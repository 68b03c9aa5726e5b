//! Conversion of DKAN package records into the CKAN metadata schema.
//!
//! Each step is a separate function that tolerates missing input. Only a
//! package without resources, or an `extras` value of an unknown shape, is
//! rejected with [`AppError::Conversion`]. Unparseable dates and sizes are
//! logged and replaced.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Value;

use crate::dates::{DateField, DateNormalizer, now_created, now_last_modified};
use crate::error::AppError;
use crate::models::{
    Extra, GroupRef, NormalizedPackage, NormalizedResource, RemotePackage, RemoteResource, Tag,
};
use crate::munge::munge_title_to_name;
use crate::traits::LicenseRegistry;

/// Resource format for each MIME type DKAN reports.
pub static MIMETYPE_FORMATS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("text/html", "HTML"),
        ("text/csv", "CSV"),
        ("text/xml", "XML"),
        ("application/pdf", "PDF"),
        ("application/zip", "ZIP"),
        ("application/rdf+xml", "RDF"),
        ("application/json", "JSON"),
        ("application/vnd.ms-excel", "XLS"),
        ("application/vnd.google-earth.kml+xml", "KML"),
        ("application/msword", "DOC"),
    ])
});

/// Looks up the resource format for a MIME type.
pub fn format_for_mimetype(mimetype: &str) -> Option<&'static str> {
    MIMETYPE_FORMATS.get(mimetype.trim()).copied()
}

/// Converts [`RemotePackage`]s into [`NormalizedPackage`]s.
///
/// The license list is read once at construction.
///
/// # Examples
///
/// ```
/// use dkan_harvest_core::convert::DkanConverter;
/// use dkan_harvest_core::dates::DateNormalizer;
/// use dkan_harvest_core::models::RemotePackage;
/// use dkan_harvest_core::traits::{License, LicenseRegistry};
///
/// #[derive(Clone)]
/// struct Licenses;
///
/// impl LicenseRegistry for Licenses {
///     fn licenses(&self) -> Vec<License> {
///         vec![License::new("cc-by", "Creative Commons Attribution")]
///     }
/// }
///
/// let converter = DkanConverter::new(&Licenses, DateNormalizer::default());
/// let remote: RemotePackage = serde_json::from_str(r#"{
///     "id": "42",
///     "title": "Street Trees",
///     "license_title": "Creative Commons Attribution",
///     "private": true,
///     "resources": [{"title": "Trees", "mimetype": "text/csv", "size": "12.5 MB"}]
/// }"#).unwrap();
///
/// let package = converter.convert(remote).unwrap();
/// assert_eq!(package.name, "street-trees");
/// assert_eq!(package.license_id.as_deref(), Some("cc-by"));
/// assert!(!package.private);
/// assert_eq!(package.resources[0].format, "CSV");
/// assert_eq!(package.resources[0].size, Some(12.5));
/// ```
#[derive(Debug, Clone)]
pub struct DkanConverter {
    /// License title → license id.
    license_ids: HashMap<String, String>,
    dates: DateNormalizer,
}

impl DkanConverter {
    pub fn new<L: LicenseRegistry>(licenses: &L, dates: DateNormalizer) -> Self {
        let license_ids = licenses
            .licenses()
            .into_iter()
            .map(|l| (l.title, l.id))
            .collect();
        Self { license_ids, dates }
    }

    /// Converts one remote record.
    pub fn convert(&self, remote: RemotePackage) -> Result<NormalizedPackage, AppError> {
        let extras = extras_list(remote.extras, &remote.id)?;
        let name = derive_name(remote.name, remote.title.as_deref(), &remote.id);
        let notes = remote.description.or(remote.notes);
        // The remote license_id names a remote license, so only a title match counts.
        let license_id = self.resolve_license(remote.license_title.as_deref());

        let resources = match remote.resources {
            Some(resources) if !resources.is_empty() => resources,
            _ => {
                return Err(AppError::Conversion(format!(
                    "Dataset {} has no resources",
                    remote.id
                )));
            }
        };
        let resources = resources
            .into_iter()
            .map(|r| self.convert_resource(&remote.id, r))
            .collect();

        Ok(NormalizedPackage {
            name,
            title: remote.title,
            notes,
            license_id,
            license_title: remote.license_title,
            // DKAN flags public datasets as private; anything the remote
            // served to us is public.
            private: false,
            owner_org: remote.owner_org,
            metadata_modified: remote.metadata_modified,
            package_type: remote.package_type,
            tags: tag_list(remote.tags),
            groups: group_list(remote.groups),
            extras,
            resources,
            other: remote.other,
            id: remote.id,
        })
    }

    fn resolve_license(&self, title: Option<&str>) -> Option<String> {
        title.and_then(|t| self.license_ids.get(t)).cloned()
    }

    fn convert_resource(&self, package_id: &str, resource: RemoteResource) -> NormalizedResource {
        let description = resource.display_name().map(str::to_string);
        let size = resource.size.as_ref().and_then(|v| parse_size(v, package_id));
        let created = self.normalize_date(package_id, resource.created.as_deref(), DateField::Created);
        let last_modified = self.normalize_date(
            package_id,
            resource.last_modified.as_deref(),
            DateField::LastModified,
        );
        let format = match resource.format {
            Some(format) if !format.trim().is_empty() => format,
            _ => resource
                .mimetype
                .as_deref()
                .and_then(format_for_mimetype)
                .unwrap_or_default()
                .to_string(),
        };

        // revision_id and url_type are dropped here.
        NormalizedResource {
            id: resource.id,
            url: resource.url,
            name: resource.name.or(resource.title),
            description,
            format,
            mimetype: resource.mimetype,
            size,
            created,
            last_modified,
            other: resource.other,
        }
    }

    fn normalize_date(&self, package_id: &str, value: Option<&str>, field: DateField) -> String {
        let fallback = || match field {
            DateField::Created => now_created(),
            DateField::LastModified => now_last_modified(),
        };
        let Some(value) = value else {
            return fallback();
        };
        match self.dates.normalize(value, field) {
            Ok(date) => date,
            Err(e) => {
                tracing::warn!(
                    dataset = package_id,
                    error = %e,
                    "Could not parse resource date, using the current time"
                );
                fallback()
            }
        }
    }
}

/// Extras come as an object (`{"k": "v"}`) or a CKAN key/value list.
fn extras_list(extras: Option<Value>, package_id: &str) -> Result<Vec<Extra>, AppError> {
    match extras {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map.into_iter().map(|(k, v)| Extra::new(k, v)).collect()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<Extra>(item).map_err(|e| {
                    AppError::Conversion(format!(
                        "Dataset {} has a malformed extra: {}",
                        package_id, e
                    ))
                })
            })
            .collect(),
        Some(other) => Err(AppError::Conversion(format!(
            "Dataset {} has extras of unsupported shape: {}",
            package_id, other
        ))),
    }
}

fn derive_name(name: Option<String>, title: Option<&str>, id: &str) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name,
        _ => munge_title_to_name(title.unwrap_or(id)),
    }
}

/// Tags may be CKAN tag objects or plain strings; anything else is skipped.
fn tag_list(tags: Option<Value>) -> Vec<Tag> {
    let Some(Value::Array(items)) = tags else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .filter(|name| !name.trim().is_empty())
        .map(Tag::new)
        .collect()
}

/// Groups may be objects with `id`/`name`/`title` or plain names.
fn group_list(groups: Option<Value>) -> Vec<GroupRef> {
    let Some(Value::Array(items)) = groups else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(GroupRef {
                name: Some(name),
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value::<GroupRef>(item).ok(),
            _ => None,
        })
        .filter(|g| g.identifier().is_some())
        .collect()
}

/// Parses a resource size such as `"12.5 MB"`, `"300KB"` or `1024`.
///
/// Unit suffixes are stripped, not applied. Unparseable strings yield `0.0`.
pub fn parse_size(value: &Value, package_id: &str) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .replace("KB", "")
                .replace("MB", "")
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            match cleaned.parse::<f64>() {
                Ok(size) => Some(size),
                Err(_) => {
                    tracing::warn!(
                        dataset = package_id,
                        size = %s,
                        "Could not parse resource size, using 0"
                    );
                    Some(0.0)
                }
            }
        }
        other => {
            tracing::warn!(
                dataset = package_id,
                size = %other,
                "Unexpected resource size type, using 0"
            );
            Some(0.0)
        }
    }
}
