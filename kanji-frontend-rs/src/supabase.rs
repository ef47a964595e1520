use ladder::supabase::{SupabaseConfig, SupabaseTable};

/// Baked in at build time. Builds without these talk to nobody and keep progress on the device.
pub(crate) fn config() -> SupabaseConfig {
    SupabaseConfig {
        supabase_url: option_env!("SUPABASE_URL").unwrap_or_default().to_string(),
        supabase_anon_key: option_env!("SUPABASE_ANON_KEY")
            .unwrap_or_default()
            .to_string(),
    }
}

pub(crate) fn table() -> Option<SupabaseTable> {
    SupabaseTable::new(&config())
}

pub(crate) fn is_configured() -> bool {
    config().is_configured()
}
