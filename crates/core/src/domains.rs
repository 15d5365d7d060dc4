//! Source data domains mirrored from the object store.

/// Every domain with an external table, in registration order.
pub const DOMAINS: [&str; 20] = [
    "admissions", "labs", "pharmacy", "radiology", "vitals", "billing",
    "appointments", "allergies", "diagnoses", "procedures", "medications",
    "observations", "immunizations", "encounters", "claims", "registrations",
    "careplans", "devices", "providers", "patients",
];

/// Name of a domain's external table.
pub fn external_table_name(domain: &str) -> String {
    format!("{}_external", domain)
}

/// Dataset holding a domain's tables in an environment.
pub fn domain_dataset(domain: &str, environment: &str) -> String {
    format!("{}_{}", domain, environment)
}
