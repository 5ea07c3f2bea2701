use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::Endpoints;
use crate::error::ManagerError;
use crate::http::send_with_retries;
use crate::session::{Credential, Session, StoredCookie};
use crate::store::Store;

const XSRF_COOKIE: &str = "XSRF-TOKEN";

pub trait Authenticator: Send + Sync {
    /// Performs a fresh login and returns a new session.
    fn login(&self, credential: &Credential) -> Result<Session, ManagerError>;
}

#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    endpoints: Endpoints,
}

impl HttpAuthenticator {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    fn is_login_page(&self, url: &Url) -> bool {
        Url::parse(&self.endpoints.login)
            .map(|login| login.host_str() == url.host_str() && login.path() == url.path())
            .unwrap_or(false)
    }
}

impl Authenticator for HttpAuthenticator {
    fn login(&self, credential: &Credential) -> Result<Session, ManagerError> {
        let session = Session::new()?;
        let client = session.client();

        info!(user = %credential.username, "logging in");
        let page = send_with_retries(|| client.get(&self.endpoints.login))?;
        if !page.status().is_success() {
            return Err(ManagerError::AuthenticationFailure(format!(
                "login page returned status {}",
                page.status().as_u16()
            )));
        }
        let token = session.cookie(XSRF_COOKIE).ok_or_else(|| {
            ManagerError::AuthenticationFailure("login page did not issue a token".to_string())
        })?;

        let response = client
            .post(&self.endpoints.login)
            .form(&[
                ("_token", token.as_str()),
                ("login_id", credential.username.as_str()),
                ("password", credential.password.as_str()),
            ])
            .send()
            .map_err(|err| ManagerError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ManagerError::AuthenticationFailure(format!(
                "login returned status {}",
                response.status().as_u16()
            )));
        }

        let mypage = send_with_retries(|| client.get(&self.endpoints.mypage))?;
        if !mypage.status().is_success() {
            return Err(ManagerError::AuthenticationFailure(format!(
                "mypage returned status {}",
                mypage.status().as_u16()
            )));
        }
        if self.is_login_page(mypage.url()) {
            return Err(ManagerError::AuthenticationFailure(
                "username or password rejected".to_string(),
            ));
        }

        session.set_cookie(StoredCookie::new("adultchecked", "1", ".dlsite.com"));

        // The play site issues its own cookies on the first visit.
        match send_with_retries(|| client.get(&self.endpoints.play)) {
            Ok(response) if response.status().is_success() => {
                debug!(cookies = session.cookies().len(), "collected play cookies");
            }
            Ok(response) => warn!(status = response.status().as_u16(), "play top page failed"),
            Err(err) => warn!(error = %err, "play top page failed"),
        }
        Ok(session)
    }
}

/// Opens a session in order of preference: explicit credential, saved
/// session, stored credential.
pub fn open_session(
    store: &Store,
    authenticator: &dyn Authenticator,
    explicit: Option<&Credential>,
) -> Result<Session, ManagerError> {
    if let Some(credential) = explicit {
        let session = authenticator.login(credential)?;
        store.save_session(&session)?;
        return Ok(session);
    }
    if let Some(session) = store.load_session()? {
        debug!(path = %store.session_path(), "loaded saved session");
        return Ok(session);
    }
    if let Some(credential) = store.load_credential()? {
        let session = authenticator.login(&credential)?;
        store.save_session(&session)?;
        return Ok(session);
    }
    Err(ManagerError::MissingCredential)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    #[derive(Default)]
    struct CountingAuthenticator {
        logins: Mutex<Vec<String>>,
    }

    impl Authenticator for CountingAuthenticator {
        fn login(&self, credential: &Credential) -> Result<Session, ManagerError> {
            self.logins.lock().unwrap().push(credential.username.clone());
            let session = Session::new()?;
            session.set_cookie(StoredCookie::new("login_user", &credential.username, "dlsite.com"));
            Ok(session)
        }
    }

    fn store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, Store::new_with_paths(dir))
    }

    #[test]
    fn missing_everything_is_missing_credential() {
        let (_temp, store) = store();
        let auth = CountingAuthenticator::default();
        let err = open_session(&store, &auth, None).unwrap_err();
        assert_matches!(err, ManagerError::MissingCredential);
    }

    #[test]
    fn explicit_credential_logs_in_and_persists() {
        let (_temp, store) = store();
        let auth = CountingAuthenticator::default();
        let credential = Credential::new("alice", "pw");
        open_session(&store, &auth, Some(&credential)).unwrap();

        assert_eq!(auth.logins.lock().unwrap().as_slice(), ["alice"]);
        let saved = store.load_session().unwrap().unwrap();
        assert_eq!(saved.cookie("login_user").as_deref(), Some("alice"));
    }

    #[test]
    fn saved_session_wins_over_stored_credential() {
        let (_temp, store) = store();
        let auth = CountingAuthenticator::default();
        let session = Session::new().unwrap();
        session.set_cookie(StoredCookie::new("sid", "saved", "dlsite.com"));
        store.save_session(&session).unwrap();
        store
            .save_credential(&Credential::new("bob", "pw"))
            .unwrap();

        let opened = open_session(&store, &auth, None).unwrap();
        assert_eq!(opened.cookie("sid").as_deref(), Some("saved"));
        assert!(auth.logins.lock().unwrap().is_empty());
    }

    #[test]
    fn stored_credential_used_without_session() {
        let (_temp, store) = store();
        let auth = CountingAuthenticator::default();
        store
            .save_credential(&Credential::new("carol", "pw"))
            .unwrap();

        open_session(&store, &auth, None).unwrap();
        assert_eq!(auth.logins.lock().unwrap().as_slice(), ["carol"]);
        assert!(store.session_path().as_std_path().exists());
    }
}
