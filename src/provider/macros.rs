//! Link-time provider registration.
//!
//! Each provider module invokes [`register_provider!`](crate::register_provider)
//! once. The invocation adds an entry to [`PROVIDER_REGISTRY`], which
//! `Box<dyn Provider>::try_from` scans by URI scheme and `onepw-receiver
//! providers` lists.

use super::{Provider, ProviderInfo};
use crate::Result;

/// One registry entry: display metadata, the URI schemes the provider claims,
/// and a constructor from a parsed URI.
#[doc(hidden)]
pub struct ProviderRegistration {
    pub info: ProviderInfo,
    pub schemes: &'static [&'static str],
    /// Builds the provider's config from the URI, then the provider itself.
    pub factory: fn(&url::Url) -> Result<Box<dyn Provider>>,
}

#[doc(hidden)]
#[linkme::distributed_slice]
pub static PROVIDER_REGISTRY: [ProviderRegistration];

/// Registers a provider under a name and one or more URI schemes.
///
/// `config` must implement `TryFrom<&Url, Error = ReceiverError>` and the
/// provider needs a fallible `new(config) -> Result<Self>`. The macro also
/// defines `PROVIDER_NAME` on the provider for its `Provider::name`.
///
/// ```ignore
/// register_provider! {
///     struct: OnePasswordProvider,
///     config: OnePasswordConfig,
///     name: "onepassword",
///     description: "1Password Connect server",
///     schemes: ["onepassword", "onepassword+https"],
///     examples: ["onepassword://localhost:8080/Private"],
/// }
/// ```
#[doc(hidden)]
#[macro_export]
macro_rules! register_provider {
    (
        struct: $struct_name:ident,
        config: $config_type:ty,
        name: $name:expr,
        description: $description:expr,
        schemes: [$($scheme:expr),* $(,)?],
        examples: [$($example:expr),* $(,)?] $(,)?
    ) => {
        impl $struct_name {
            const PROVIDER_NAME: &'static str = $name;
        }

        const _: () = {
            #[linkme::distributed_slice($crate::provider::PROVIDER_REGISTRY)]
            #[doc(hidden)]
            static PROVIDER_REGISTRATION: $crate::provider::ProviderRegistration = $crate::provider::ProviderRegistration {
                info: $crate::provider::ProviderInfo {
                    name: $name,
                    description: $description,
                    examples: &[$($example,)*],
                },
                schemes: &[$($scheme,)*],
                factory: |url| {
                    let config = <$config_type>::try_from(url)?;
                    Ok(Box::new(<$struct_name>::new(config)?))
                },
            };
        };
    };
}
