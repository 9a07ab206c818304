use anyhow::Result;
use asterai_cli::cli::ConfigCommand;
use asterai_cli::config;

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Set(args) => {
            let path = config::resolve_config_path(args.file.as_deref())?;
            config::set_value(&path, &args.key, &args.value)?;
            println!("updated {}", path.display());
        }
        ConfigCommand::Path => println!("{}", config::resolve_config_path(None)?.display()),
    }
    Ok(())
}
