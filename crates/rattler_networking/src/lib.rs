#![deny(missing_docs)]

//! Networking utilities for Rattler: authenticated and mirrored HTTP access
//! for the download engine, plus a lazily-initialized shared client.

use reqwest::{Client, IntoUrl, Method, Url};

pub mod authentication_middleware;
pub mod authentication_storage;
mod lazy_client;
pub mod mirror_middleware;
pub mod redaction;
pub mod retry_policies;

pub use authentication_middleware::{default_auth_store_fallback_directory, AuthenticationMiddleware};
pub use authentication_storage::{
    authentication::Authentication, storage::AuthenticationStorage, AuthenticationStorageError,
};
pub use lazy_client::LazyClient;
pub use mirror_middleware::MirrorMiddleware;
pub use redaction::{redact_known_secrets_from_url, Redact, DEFAULT_REDACTION_STR};

impl Default for AuthenticationStorage {
    fn default() -> Self {
        AuthenticationStorage::from_env_and_defaults().unwrap_or_else(|e| {
            tracing::warn!("failed to initialize default authentication storage: {e}");
            AuthenticationStorage::empty()
        })
    }
}

/// A client that can be used to make authenticated requests, based on the
/// [`reqwest::Client`]. By default it uses the fallback storage in the
/// default [`default_auth_store_fallback_directory`].
#[derive(Clone, Default)]
pub struct AuthenticatedClient {
    /// The underlying client
    client: Client,

    /// The authentication storage
    auth_storage: AuthenticationStorage,
}

impl AuthenticatedClient {
    /// Create a new authenticated client from the given client and authentication storage
    pub fn from_client(client: Client, auth_storage: AuthenticationStorage) -> AuthenticatedClient {
        AuthenticatedClient {
            client,
            auth_storage,
        }
    }

    /// Create a GET request builder for the given URL (see also [`reqwest::Client::get`])
    pub fn get<U: IntoUrl>(&self, url: U) -> reqwest::RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder for the given URL (see also [`reqwest::Client::post`])
    pub fn post<U: IntoUrl>(&self, url: U) -> reqwest::RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a HEAD request builder for the given URL (see also [`reqwest::Client::head`])
    pub fn head<U: IntoUrl>(&self, url: U) -> reqwest::RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create a request builder for the given URL (see also [`reqwest::Client::request`])
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> reqwest::RequestBuilder {
        let url_clone = url.as_str().to_string();
        match self.auth_storage.get_by_url(url) {
            Err(_) => {
                // forward error to caller (invalid URL)
                self.client.request(method, url_clone)
            }
            Ok((url, auth)) => {
                let url = Self::authenticate_url(url, &auth);
                let request_builder = self.client.request(method, url);
                Self::authenticate_request(request_builder, &auth)
            }
        }
    }

    fn authenticate_url(url: Url, auth: &Option<Authentication>) -> Url {
        if let Some(Authentication::CondaToken(token)) = auth {
            let path = url.path();
            let mut new_path = String::new();
            new_path.push_str(format!("/t/{token}").as_str());
            new_path.push_str(path);
            let mut url = url.clone();
            url.set_path(&new_path);
            url
        } else {
            url
        }
    }

    fn authenticate_request(
        builder: reqwest::RequestBuilder,
        auth: &Option<Authentication>,
    ) -> reqwest::RequestBuilder {
        match auth {
            Some(Authentication::BearerToken(token)) => builder.bearer_auth(token),
            Some(Authentication::BasicHTTP { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(Authentication::CondaToken(_)) | None => builder,
        }
    }
}

/// A blocking client that can be used to make authenticated requests, based
/// on the [`reqwest::blocking::Client`]. By default it uses the fallback
/// storage in the default [`default_auth_store_fallback_directory`].
#[derive(Default)]
pub struct AuthenticatedClientBlocking {
    /// The underlying client
    client: reqwest::blocking::Client,

    /// The authentication storage
    auth_storage: AuthenticationStorage,
}

impl AuthenticatedClientBlocking {
    /// Create a new authenticated client from the given client and authentication storage
    pub fn from_client(
        client: reqwest::blocking::Client,
        auth_storage: AuthenticationStorage,
    ) -> AuthenticatedClientBlocking {
        AuthenticatedClientBlocking {
            client,
            auth_storage,
        }
    }

    /// Create a GET request builder for the given URL (see also [`reqwest::blocking::Client::get`])
    pub fn get<U: IntoUrl>(&self, url: U) -> reqwest::blocking::RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Create a POST request builder for the given URL (see also [`reqwest::blocking::Client::post`])
    pub fn post<U: IntoUrl>(&self, url: U) -> reqwest::blocking::RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Create a HEAD request builder for the given URL (see also [`reqwest::blocking::Client::head`])
    pub fn head<U: IntoUrl>(&self, url: U) -> reqwest::blocking::RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Create a request builder for the given URL (see also [`reqwest::blocking::Client::request`])
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> reqwest::blocking::RequestBuilder {
        let url_clone = url.as_str().to_string();
        match self.auth_storage.get_by_url(url) {
            Err(_) => {
                // forward error to caller (invalid URL)
                self.client.request(method, url_clone)
            }
            Ok((url, auth)) => {
                let url = Self::authenticate_url(url, &auth);
                let request_builder = self.client.request(method, url);
                Self::authenticate_request(request_builder, &auth)
            }
        }
    }

    fn authenticate_url(url: Url, auth: &Option<Authentication>) -> Url {
        if let Some(Authentication::CondaToken(token)) = auth {
            let path = url.path();
            let mut new_path = String::new();
            new_path.push_str(format!("/t/{token}").as_str());
            new_path.push_str(path);
            let mut url = url.clone();
            url.set_path(&new_path);
            url
        } else {
            url
        }
    }

    fn authenticate_request(
        builder: reqwest::blocking::RequestBuilder,
        auth: &Option<Authentication>,
    ) -> reqwest::blocking::RequestBuilder {
        match auth {
            Some(Authentication::BearerToken(token)) => builder.bearer_auth(token),
            Some(Authentication::BasicHTTP { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            Some(Authentication::CondaToken(_)) | None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_at(dir: &std::path::Path) -> AuthenticationStorage {
        let mut storage = AuthenticationStorage::empty();
        storage.add_backend(std::sync::Arc::from(
            authentication_storage::backends::file::FileStorage::from_path(
                dir.join("auth.json"),
            )
            .unwrap(),
        ));
        storage
    }

    #[test]
    fn test_conda_token_storage() -> anyhow::Result<()> {
        let tdir = tempdir()?;
        let storage = storage_at(tdir.path());
        let host = "conda.example.com";
        assert!(storage.get(host)?.is_none());

        let authentication = Authentication::CondaToken("testtoken".to_string());
        storage.store(host, &authentication)?;
        assert_eq!(storage.get(host)?, Some(authentication.clone()));

        let client = AuthenticatedClient::from_client(reqwest::Client::default(), storage.clone());
        let request = client.get("https://conda.example.com/conda-forge/noarch/testpkg.tar.bz2");
        let request = request.build().unwrap();
        assert!(request.url().path().starts_with("/t/testtoken"));

        storage.delete(host)?;
        Ok(())
    }

    #[test]
    fn test_bearer_storage() -> anyhow::Result<()> {
        let tdir = tempdir()?;
        let storage = storage_at(tdir.path());
        let host = "bearer.example.com";

        let authentication = Authentication::BearerToken("xyztokytoken".to_string());
        storage.store(host, &authentication)?;

        let client = AuthenticatedClient::from_client(reqwest::Client::default(), storage.clone());
        let request = client.get("https://bearer.example.com/conda-forge/noarch/testpkg.tar.bz2");
        let request = request.build().unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Bearer xyztokytoken"
        );

        storage.delete(host)?;
        Ok(())
    }

    #[test]
    fn test_basic_auth_storage() -> anyhow::Result<()> {
        let tdir = tempdir()?;
        let storage = storage_at(tdir.path());
        let host = "basic.example.com";

        let authentication = Authentication::BasicHTTP {
            username: "testuser".to_string(),
            password: "testpassword".to_string(),
        };
        storage.store(host, &authentication)?;

        let client = AuthenticatedClient::from_client(reqwest::Client::default(), storage.clone());
        let request = client.get("https://basic.example.com/conda-forge/noarch/testpkg.tar.bz2");
        let request = request.build().unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            // this is the base64 encoding of "testuser:testpassword"
            "Basic dGVzdHVzZXI6dGVzdHBhc3N3b3Jk"
        );

        storage.delete(host)?;
        Ok(())
    }
}
