/// Authentication state of the application as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Route {
    #[default]
    Login,
    Mailbox,
}

/// Drives which view is shown and guards the mailbox view.
#[derive(Debug, Default)]
pub struct Page {
    state: AuthState,
    route: Route,
    error: Option<String>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starting point when a saved session may exist.
    pub fn restored(signed_in: bool) -> Self {
        let mut page = Self::new();
        if signed_in {
            page.state = AuthState::Authenticated;
            page.route = Route::Mailbox;
        }
        page
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// The login control is only live while signed out.
    pub fn can_login(&self) -> bool {
        self.state == AuthState::Unauthenticated
    }

    /// Returns false (and changes nothing) when a login cannot start.
    pub fn begin_login(&mut self) -> bool {
        if !self.can_login() {
            return false;
        }
        self.state = AuthState::Authenticating;
        self.error = None;
        true
    }

    pub fn login_succeeded(&mut self) {
        self.state = AuthState::Authenticated;
        self.error = None;
        self.route = Route::Mailbox;
    }

    pub fn login_failed(&mut self, error: impl Into<String>) {
        self.state = AuthState::Unauthenticated;
        self.error = Some(error.into());
        self.route = Route::Login;
    }

    /// The credential was found invalid somewhere; back to the login view.
    pub fn credential_invalidated(&mut self, reason: impl Into<String>) {
        self.state = AuthState::Unauthenticated;
        self.error = Some(reason.into());
        self.route = Route::Login;
    }

    pub fn logout(&mut self) {
        self.state = AuthState::Unauthenticated;
        self.error = None;
        self.route = Route::Login;
    }

    /// Moves to `route`, redirecting to the login view when the mailbox is
    /// requested without a credential.
    pub fn navigate(&mut self, route: Route, has_credential: bool) -> Route {
        self.route = match route {
            Route::Mailbox if !has_credential => Route::Login,
            other => other,
        };
        self.route
    }
}
