//! Machine-readable route map of the administrative dashboard.
//!
//! The dashboard is served by the host application; this crate only publishes
//! which routes exist, which action each maps to, and the JSON schemas of the
//! projections those actions render.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;

use jobdeck_kernel::status::ExecutionStatus;
use jobdeck_kernel::DeckError;

use crate::capabilities::SchemaCapabilities;
use crate::error_events::ErrorSummary;
use crate::models::{ErrorEvent, JobSummary};
use crate::projection::{ExecutionView, JobDetailView};

#[derive(Clone, Debug, Serialize)]
pub struct DashboardContract {
    pub api_version: &'static str,
    pub contract_kind: &'static str,
    pub routes: Vec<RouteContract>,
    pub schemas: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RouteContract {
    pub method: &'static str,
    pub path: &'static str,
    /// `controller#action`.
    pub action: &'static str,
    pub summary: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<&'static str>,
    pub path_params: Vec<PathParamContract>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PathParamContract {
    pub name: &'static str,
    pub schema_type: &'static str,
    pub required: bool,
}

pub fn dashboard_contract() -> Result<DashboardContract, DeckError> {
    let mut schemas = BTreeMap::new();
    add_schema::<ExecutionView>(&mut schemas, "ExecutionView")?;
    add_schema::<JobDetailView>(&mut schemas, "JobDetailView")?;
    add_schema::<JobSummary>(&mut schemas, "JobSummary")?;
    add_schema::<ExecutionStatus>(&mut schemas, "ExecutionStatus")?;
    add_schema::<ErrorEvent>(&mut schemas, "ErrorEvent")?;
    add_schema::<ErrorSummary>(&mut schemas, "ErrorSummary")?;
    add_schema::<SchemaCapabilities>(&mut schemas, "SchemaCapabilities")?;

    Ok(DashboardContract {
        api_version: "v1",
        contract_kind: "dashboard-route-map",
        routes: dashboard_routes(),
        schemas,
    })
}

pub fn dashboard_contract_pretty_json() -> Result<String, DeckError> {
    let contract = dashboard_contract()?;
    serde_json::to_string_pretty(&contract)
        .map_err(|e| DeckError::Decode(format!("render dashboard contract: {}", e)))
}

pub fn dashboard_routes() -> Vec<RouteContract> {
    vec![
        redirect("GET", "/", "root", "Land on the jobs list", "/jobs"),
        route("GET", "/jobs", "jobs#index", "List jobs", None, vec![]),
        route(
            "GET",
            "/jobs/:id",
            "jobs#show",
            "Show a job with its execution attempts",
            Some("JobDetailView"),
            vec![path_param("id")],
        ),
        route(
            "DELETE",
            "/jobs/:id",
            "jobs#destroy",
            "Delete a finished job",
            None,
            vec![path_param("id")],
        ),
        redirect(
            "GET",
            "/jobs/mass_update",
            "jobs#mass_update",
            "Bounce a bare mass-update visit back to the list",
            "/jobs",
        ),
        route(
            "PUT",
            "/jobs/mass_update",
            "jobs#mass_update",
            "Apply an action to many jobs",
            None,
            vec![],
        ),
        job_member("/jobs/:id/discard", "jobs#discard", "Discard a job"),
        job_member(
            "/jobs/:id/force_discard",
            "jobs#force_discard",
            "Discard a job even while it runs",
        ),
        job_member(
            "/jobs/:id/reschedule",
            "jobs#reschedule",
            "Reschedule a job to run now",
        ),
        job_member("/jobs/:id/retry", "jobs#retry", "Retry a discarded job"),
        route(
            "GET",
            "/jobs/metrics/primary_nav",
            "metrics#primary_nav",
            "Counts for the primary navigation",
            None,
            vec![],
        ),
        route(
            "GET",
            "/jobs/metrics/job_status",
            "metrics#job_status",
            "Counts of jobs per status",
            None,
            vec![],
        ),
        route("GET", "/batches", "batches#index", "List batches", None, vec![]),
        route(
            "GET",
            "/batches/:id",
            "batches#show",
            "Show a batch",
            None,
            vec![path_param("id")],
        ),
        route(
            "GET",
            "/cron_entries",
            "cron_entries#index",
            "List cron entries",
            None,
            vec![],
        ),
        route(
            "GET",
            "/cron_entries/:cron_key",
            "cron_entries#show",
            "Show a cron entry",
            None,
            vec![path_param("cron_key")],
        ),
        cron_member(
            "POST",
            "/cron_entries/:cron_key/enqueue",
            "cron_entries#enqueue",
            "Enqueue a cron entry immediately",
        ),
        cron_member(
            "PUT",
            "/cron_entries/:cron_key/enable",
            "cron_entries#enable",
            "Enable a cron entry",
        ),
        cron_member(
            "PUT",
            "/cron_entries/:cron_key/disable",
            "cron_entries#disable",
            "Disable a cron entry",
        ),
        route(
            "GET",
            "/processes",
            "processes#index",
            "List worker processes",
            None,
            vec![],
        ),
        route(
            "GET",
            "/performances",
            "performances#index",
            "Job performance overview",
            None,
            vec![],
        ),
        asset(
            "/frontend/modules/:name",
            "frontends#module",
            "Serve a frontend script module",
            vec!["js"],
        ),
        asset(
            "/frontend/static/:name",
            "frontends#static",
            "Serve a static frontend asset",
            vec!["css", "js"],
        ),
    ]
}

fn add_schema<T: JsonSchema>(
    schemas: &mut BTreeMap<String, Value>,
    name: &str,
) -> Result<(), DeckError> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(&schema)
        .map_err(|e| DeckError::Decode(format!("serialize schema {}: {}", name, e)))?;
    schemas.insert(name.to_string(), canonicalize_json(value));
    Ok(())
}

fn canonicalize_json(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_json).collect()),
        Value::Object(entries) => {
            let mut sorted = BTreeMap::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize_json(value));
            }
            Value::Object(sorted.into_iter().collect())
        }
        other => other,
    }
}

fn route(
    method: &'static str,
    path: &'static str,
    action: &'static str,
    summary: &'static str,
    response_schema: Option<&'static str>,
    path_params: Vec<PathParamContract>,
) -> RouteContract {
    RouteContract {
        method,
        path,
        action,
        summary,
        redirect_to: None,
        response_schema,
        path_params,
        formats: Vec::new(),
    }
}

fn redirect(
    method: &'static str,
    path: &'static str,
    action: &'static str,
    summary: &'static str,
    target: &'static str,
) -> RouteContract {
    RouteContract {
        redirect_to: Some(target),
        ..route(method, path, action, summary, None, vec![])
    }
}

fn job_member(
    path: &'static str,
    action: &'static str,
    summary: &'static str,
) -> RouteContract {
    route("PUT", path, action, summary, None, vec![path_param("id")])
}

fn cron_member(
    method: &'static str,
    path: &'static str,
    action: &'static str,
    summary: &'static str,
) -> RouteContract {
    route(method, path, action, summary, None, vec![path_param("cron_key")])
}

fn asset(
    path: &'static str,
    action: &'static str,
    summary: &'static str,
    formats: Vec<&'static str>,
) -> RouteContract {
    RouteContract {
        formats,
        ..route("GET", path, action, summary, None, vec![path_param("name")])
    }
}

fn path_param(name: &'static str) -> PathParamContract {
    PathParamContract {
        name,
        schema_type: "string",
        required: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(
        routes: &'a [RouteContract],
        method: &str,
        path: &str,
    ) -> Option<&'a RouteContract> {
        routes
            .iter()
            .find(|route| route.method == method && route.path == path)
    }

    #[test]
    fn contract_covers_dashboard_surface() {
        let contract = dashboard_contract().expect("build contract");
        assert_eq!(contract.routes.len(), 23);
        assert!(contract.schemas.contains_key("ExecutionView"));
        assert!(contract.schemas.contains_key("JobDetailView"));

        let show = find(&contract.routes, "GET", "/jobs/:id").expect("jobs#show");
        assert_eq!(show.response_schema, Some("JobDetailView"));

        for action in ["discard", "force_discard", "reschedule", "retry"] {
            let path = format!("/jobs/:id/{}", action);
            let member = find(&contract.routes, "PUT", &path).expect("job member route");
            assert_eq!(member.action, format!("jobs#{}", action));
        }

        let enqueue = find(&contract.routes, "POST", "/cron_entries/:cron_key/enqueue")
            .expect("cron enqueue");
        assert_eq!(enqueue.path_params[0].name, "cron_key");
    }

    #[test]
    fn mass_update_get_redirects_to_jobs() {
        let routes = dashboard_routes();
        let bounce = find(&routes, "GET", "/jobs/mass_update").expect("mass update redirect");
        assert_eq!(bounce.redirect_to, Some("/jobs"));
        let apply = find(&routes, "PUT", "/jobs/mass_update").expect("mass update");
        assert_eq!(apply.redirect_to, None);
    }

    #[test]
    fn static_assets_declare_formats() {
        let routes = dashboard_routes();
        let assets = find(&routes, "GET", "/frontend/static/:name").expect("static assets");
        assert_eq!(assets.formats, vec!["css", "js"]);
    }

    #[test]
    fn pretty_json_renders_sorted_schemas() {
        let json = dashboard_contract_pretty_json().expect("render");
        let value: Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["contract_kind"], "dashboard-route-map");
        let keys: Vec<&String> = value["schemas"]
            .as_object()
            .expect("schemas object")
            .keys()
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
