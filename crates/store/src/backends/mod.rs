//! Backend implementations of the store contract.
//!
//! One module per backend type. Everything here implements
//! [`SecretStore`](crate::contract::SecretStore) and registers through
//! [`builtin_factories`].

pub mod bitwarden;
pub mod doppler;
pub mod env;
pub mod file;
pub mod infisical;
pub mod literal;
pub mod onepassword;
pub mod pass;
pub mod vault;

#[cfg(feature = "aws")]
pub mod aws;

#[cfg(feature = "os-keyring")]
pub mod os_keyring;

use std::sync::Arc;

use crate::contract::StoreFactory;

/// Every compiled-in store factory.
pub fn builtin_factories() -> Vec<Arc<dyn StoreFactory>> {
    let mut factories: Vec<Arc<dyn StoreFactory>> = vec![
        Arc::new(literal::LiteralFactory),
        Arc::new(file::FileFactory),
        Arc::new(env::EnvFactory),
        Arc::new(vault::VaultFactory),
        Arc::new(infisical::InfisicalFactory),
        Arc::new(onepassword::OnePasswordFactory::default()),
        Arc::new(bitwarden::BitwardenFactory::default()),
        Arc::new(doppler::DopplerFactory::default()),
        Arc::new(pass::PassFactory::default()),
    ];
    #[cfg(feature = "aws")]
    {
        factories.push(Arc::new(aws::SecretsManagerFactory));
        factories.push(Arc::new(aws::SsmFactory));
    }
    #[cfg(feature = "os-keyring")]
    {
        factories.push(Arc::new(os_keyring::KeyringFactory));
    }
    factories
}
