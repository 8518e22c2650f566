//! CLI auth command handlers.

use crate::auth::{LoginRequest, SecretKey, SessionManager};

const PASSWORD_ENV: &str = "HEARTH_PASSWORD";

fn password() -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(PASSWORD_ENV).map_err(|_| format!("{PASSWORD_ENV} is not set").into())
}

/// Handle `hearth auth login <email>`.
pub async fn handle_login(
    session: &SessionManager,
    email: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = LoginRequest::new(email, password()?);
    session.login(&request).await?;
    println!("✅ Logged in as {email}");
    Ok(())
}

/// Handle `hearth auth register <email>`.
pub async fn handle_register(
    session: &SessionManager,
    email: &str,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = LoginRequest::new(email, password()?);
    if let Some(name) = name {
        request = request.with_display_name(name);
    }
    session.register(&request).await?;
    println!("✅ Registered {email}");
    Ok(())
}

/// Handle `hearth auth status`.
pub async fn handle_status(session: &SessionManager) -> Result<(), Box<dyn std::error::Error>> {
    if !session.is_authenticated().await {
        println!("Not logged in");
        return Ok(());
    }
    let user = session
        .current_user()
        .await
        .and_then(|u| u.get("email").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown user".to_string());
    println!("Logged in as {user}");
    if let Some(family) = session.selected_family().await {
        println!("   {}: {family}", SecretKey::SelectedFamily);
    }
    Ok(())
}

/// Handle `hearth auth logout`.
pub async fn handle_logout(session: &SessionManager) -> Result<(), Box<dyn std::error::Error>> {
    session.logout().await?;
    println!("Logged out");
    Ok(())
}
