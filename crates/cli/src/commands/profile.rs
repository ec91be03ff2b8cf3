//! Profile management commands
//!
//! Profiles are named connection settings: region, endpoint override and
//! optional static credentials. Without static credentials the SDK default
//! chain (environment, shared config, instance role) is used.

use clap::Subcommand;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;
use nb_core::{Profile, ProfileManager};

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Add or update a profile
    Set(SetArgs),

    /// List all configured profiles
    List(ListArgs),

    /// Remove a profile
    Remove(RemoveArgs),
}

/// Arguments for the `profile set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Profile name (e.g., "prod", "localstack")
    pub name: String,

    /// Endpoint URL override (e.g., `http://localhost:4566`)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Static access key ID
    #[arg(long, requires = "secret_key")]
    pub access_key: Option<String>,

    /// Static secret access key
    #[arg(long, requires = "access_key")]
    pub secret_key: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub path_style: bool,
}

/// Arguments for the `profile list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show region and endpoint
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `profile remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the profile to remove
    pub name: String,
}

#[derive(Serialize)]
struct ProfileListOutput {
    profiles: Vec<ProfileInfo>,
}

/// Profile information for output (never includes credentials)
#[derive(Serialize)]
struct ProfileInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    static_credentials: bool,
}

impl From<&Profile> for ProfileInfo {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.name.clone(),
            region: profile.region.clone(),
            endpoint: profile.endpoint.clone(),
            static_credentials: profile.access_key.is_some(),
        }
    }
}

#[derive(Serialize)]
struct ProfileOperationOutput {
    success: bool,
    profile: String,
    message: String,
}

/// Execute a profile subcommand
///
/// `region` is the global `--region` flag, stored by `profile set`.
pub async fn execute(
    cmd: ProfileCommands,
    region: Option<String>,
    formatter: &Formatter,
) -> ExitCode {
    let manager = match ProfileManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            formatter.error(&format!("Failed to load profiles: {e}"));
            return ExitCode::GeneralError;
        }
    };

    match cmd {
        ProfileCommands::Set(args) => execute_set(args, region, &manager, formatter),
        ProfileCommands::List(args) => execute_list(args, &manager, formatter),
        ProfileCommands::Remove(args) => execute_remove(args, &manager, formatter),
    }
}

fn execute_set(
    args: SetArgs,
    region: Option<String>,
    manager: &ProfileManager,
    formatter: &Formatter,
) -> ExitCode {
    if args.name.is_empty() {
        formatter.error("Profile name cannot be empty");
        return ExitCode::UsageError;
    }

    let mut profile = Profile::new(&args.name);
    profile.region = region;
    profile.endpoint = args.endpoint;
    profile.access_key = args.access_key;
    profile.secret_key = args.secret_key;
    profile.force_path_style = args.path_style;

    match manager.set(profile) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&ProfileOperationOutput {
                    success: true,
                    profile: args.name.clone(),
                    message: format!("Profile '{}' configured successfully", args.name),
                });
            } else {
                let styled_name = formatter.style_name(&args.name);
                formatter.success(&format!("Profile '{styled_name}' configured successfully."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from_error(&e)
        }
    }
}

fn execute_list(args: ListArgs, manager: &ProfileManager, formatter: &Formatter) -> ExitCode {
    let profiles = match manager.list() {
        Ok(profiles) => profiles,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    if formatter.is_json() {
        formatter.json(&ProfileListOutput {
            profiles: profiles.iter().map(ProfileInfo::from).collect(),
        });
    } else if profiles.is_empty() {
        formatter.println("No profiles configured.");
    } else if args.long {
        for profile in &profiles {
            let styled_name = formatter.style_name(&format!("{:<12}", profile.name));
            let region = profile.region.as_deref().unwrap_or("(sdk default)");
            let endpoint = profile.endpoint.as_deref().unwrap_or("(service default)");
            formatter.println(&format!(
                "{styled_name} {} (region: {})",
                formatter.style_arn(endpoint),
                formatter.style_date(region)
            ));
        }
    } else {
        for profile in &profiles {
            formatter.println(&formatter.style_name(&profile.name));
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &ProfileManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&ProfileOperationOutput {
                    success: true,
                    profile: args.name.clone(),
                    message: format!("Profile '{}' removed successfully", args.name),
                });
            } else {
                let styled_name = formatter.style_name(&args.name);
                formatter.success(&format!("Profile '{styled_name}' removed successfully."));
            }
            ExitCode::Success
        }
        Err(nb_core::Error::NotFound(_)) => {
            formatter.error(&format!("Profile '{}' not found", args.name));
            ExitCode::NotFound
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from_error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_info_hides_credentials() {
        let mut profile = Profile::new("localstack");
        profile.region = Some("us-east-1".to_string());
        profile.access_key = Some("test".to_string());
        profile.secret_key = Some("test".to_string());

        insta::assert_json_snapshot!(ProfileInfo::from(&profile), @r#"
        {
          "name": "localstack",
          "region": "us-east-1",
          "static_credentials": true
        }
        "#);
    }
}
