pub mod build;
pub mod config;
pub mod database;
pub mod database_template;
pub mod environment;
pub mod istio;
pub mod logger;

/// Api group of the testenv custom resources.
pub const API_GROUP: &str = "testenvironment.dev";

/// Label pointing a Database at the DatabaseTemplate it was
/// created from.
pub const LABEL_DATABASE_TEMPLATE: &str =
  "testenvironment.dev/template";

/// Label pointing a claimed Database at the Build that claimed it.
pub const LABEL_CLAIMED_BUILD: &str = "testenvironment.dev/build";
