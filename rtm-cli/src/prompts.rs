use anyhow::Result;
use inquire::{Confirm, Password, PasswordDisplayMode, Text};

use rtm_core::NewConnection;

/// Prompts the user for a new connection, keeping any values already given
pub fn prompt_new_connection(
    name: Option<String>,
    org_url: Option<String>,
    project: Option<String>,
    token: Option<String>,
) -> Result<NewConnection> {
    let name = match name {
        Some(name) => name,
        None => Text::new("Connection name:").with_default("default").prompt()?,
    };

    let org_url = match org_url {
        Some(url) => url,
        None => Text::new("Organization URL:")
            .with_placeholder("https://dev.azure.com/your-org")
            .prompt()?,
    };

    let project = match project {
        Some(project) => project,
        None => Text::new("Project:").prompt()?,
    };

    let token = match token {
        Some(token) => token,
        None => prompt_token()?,
    };

    Ok(NewConnection {
        name,
        org_url,
        project,
        token,
    })
}

/// Prompts for a personal access token without echoing it
pub fn prompt_token() -> Result<String> {
    let token = Password::new("Personal access token:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;
    Ok(token)
}

/// Asks whether the new connection should become the default
pub fn prompt_make_default() -> Result<bool> {
    Ok(Confirm::new("Make this the default connection?")
        .with_default(true)
        .prompt()?)
}

/// Asks for confirmation before removing a connection
pub fn confirm_removal(name: &str) -> Result<bool> {
    Ok(Confirm::new(&format!("Remove connection '{}'?", name))
        .with_default(false)
        .prompt()?)
}
