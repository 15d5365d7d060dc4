//! External table registration - one independent task per domain.

use std::sync::Arc;

use dqmon_core::domains::{domain_dataset, external_table_name};
use dqmon_core::{ConfigError, RunContext, VariableSpec, ENV_KEY, PROJECT_KEY};
use dqmon_execution::{task_fn, RetryPolicy, TaskSpec, Workflow, WorkflowError};
use dqmon_tools::Warehouse;
use serde_json::json;
use tracing::info;

/// Workflow name.
pub const EXTERNAL_TABLES_WORKFLOW: &str = "biglake_register_external_tables";

/// Variable naming the warehouse connection to the object store.
pub const CONNECTION_KEY: &str = "BQ_AWS_CONNECTION";

/// Variable holding a domain's object-store URI.
pub fn uri_variable(domain: &str) -> String {
    format!("S3_URI_{}", domain.to_uppercase())
}

/// `CREATE OR REPLACE EXTERNAL TABLE` statement for a domain.
pub fn external_table_ddl(domain: &str, ctx: &RunContext) -> Result<String, ConfigError> {
    let project = ctx.require_project()?;
    let connection = ctx.var(CONNECTION_KEY)?;
    let uri = ctx.var(&uri_variable(domain))?;

    Ok(format!(
        "CREATE OR REPLACE EXTERNAL TABLE `{project}.{dataset}.{table}`\n\
         WITH CONNECTION `{connection}`\n\
         OPTIONS (\n  format = 'PARQUET',\n  uris = ['{uri}']\n)",
        dataset = domain_dataset(domain, &ctx.environment),
        table = external_table_name(domain),
        uri = uri.replace('\'', "\\'"),
    ))
}

/// Build the registration workflow for `domains`. Manual trigger only.
pub fn external_tables_workflow<S: AsRef<str>>(
    domains: &[S],
    warehouse: Arc<dyn Warehouse>,
) -> Result<Workflow, WorkflowError> {
    let mut builder = Workflow::builder(EXTERNAL_TABLES_WORKFLOW)
        .description("Register or update external tables over object-store prefixes")
        .retry(RetryPolicy::none())
        .variable(VariableSpec::required(PROJECT_KEY))
        .variable(VariableSpec::required(ENV_KEY))
        .variable(VariableSpec::required(CONNECTION_KEY));

    for domain in domains {
        let domain = domain.as_ref().to_string();
        builder = builder.variable(VariableSpec::required(uri_variable(&domain)));

        let warehouse = warehouse.clone();
        let task_domain = domain.clone();
        builder = builder.task(TaskSpec::new(
            format!("register_{}", domain),
            task_fn(move |ctx, _upstream| {
                let warehouse = warehouse.clone();
                let domain = task_domain.clone();
                async move {
                    let sql = external_table_ddl(&domain, &ctx)?;
                    warehouse.execute(&sql).await?;
                    let table = format!(
                        "{}.{}",
                        domain_dataset(&domain, &ctx.environment),
                        external_table_name(&domain)
                    );
                    info!("Registered external table {}", table);
                    Ok(json!({ "table": table }))
                }
            }),
        ));
    }
    builder.build()
}
