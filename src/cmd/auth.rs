use anyhow::Result;
use asterai_cli::cli::AuthCommand;
use asterai_cli::sync::AuthStatus;

use super::Context;

pub fn run(ctx: &Context, command: AuthCommand) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    match command {
        AuthCommand::Login(args) => {
            let credential = orchestrator.auth_login(&args.api_key, args.namespace.as_deref())?;
            match &credential.namespace {
                Some(namespace) => println!("API key stored (namespace: {namespace})"),
                None => println!("API key stored"),
            }
        }
        AuthCommand::Logout => {
            if orchestrator.auth_logout()? {
                println!("logged out");
            } else {
                println!("already logged out");
            }
        }
        AuthCommand::Status => match orchestrator.auth_status()? {
            AuthStatus::LoggedOut => println!("logged out"),
            AuthStatus::LoggedIn { slug, namespace } => {
                println!("logged in as {slug}");
                if let Some(namespace) = namespace {
                    println!("namespace: {namespace}");
                }
            }
        },
    }
    Ok(())
}
