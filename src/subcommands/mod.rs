mod subcommand;
mod login_subcommand;
mod logout_subcommand;
mod main_subcommand;

pub use login_subcommand::LoginSubcommand;
pub use logout_subcommand::LogoutSubcommand;
pub use main_subcommand::MainSubcommand;
pub use subcommand::Subcommand;
