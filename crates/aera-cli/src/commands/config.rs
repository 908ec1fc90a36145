use aera_core::config::{is_http_url, normalize_text_option, DEFAULT_REPORTS_TABLE};

use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub fn run_config_init(
    profile_name: Option<&str>,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    reports_table: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing_profile = config.profile(&profile_name).cloned().unwrap_or_default();

    // Flags win; anything not passed keeps its saved value.
    let merged_supabase_url = normalize_text_option(supabase_url).or(existing_profile.supabase_url);
    let merged_supabase_anon_key =
        normalize_text_option(supabase_anon_key).or(existing_profile.supabase_anon_key);
    let merged_reports_table =
        normalize_text_option(reports_table).or(existing_profile.reports_table);

    let Some(merged_supabase_url) = merged_supabase_url else {
        return Err(CliError::Config(
            "Missing Supabase URL. Pass --supabase-url.".to_string(),
        ));
    };
    if !is_http_url(&merged_supabase_url) {
        return Err(CliError::Config(
            "Supabase URL must include http:// or https://".to_string(),
        ));
    }
    let Some(merged_supabase_anon_key) = merged_supabase_anon_key else {
        return Err(CliError::Config(
            "Missing Supabase anon key. Pass --supabase-anon-key.".to_string(),
        ));
    };

    let profile = config.profile_entry(&profile_name);
    profile.supabase_url = Some(merged_supabase_url);
    profile.supabase_anon_key = Some(merged_supabase_anon_key);
    profile.reports_table = merged_reports_table;
    let table = profile
        .reports_table
        .clone()
        .unwrap_or_else(|| DEFAULT_REPORTS_TABLE.to_string());

    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save()?;
    println!(
        "Saved profile '{profile_name}' (table {table}) to {}",
        path.display()
    );
    if config.active_profile.as_deref() == Some(profile_name.as_str()) {
        println!("Active profile: {profile_name}");
    }
    Ok(())
}
