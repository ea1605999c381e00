//! Build-time defaults loaded via `toml-cfg`.
//!
//! Override them with a `[sip_reg_checker]` table in `cfg.toml`; the CLI
//! flags override them again at run time.

#[toml_cfg::toml_config]
pub struct Settings {
    #[default(5080)]
    pub local_port: u16,
    #[default(10.0)]
    pub timeout_secs: f64,
    #[default(300)]
    pub expires: u32,
    #[default("sip-registration-checker")]
    pub user_agent: &'static str,
}
