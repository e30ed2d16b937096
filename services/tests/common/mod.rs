//! Shared test utilities for integration tests.
//!
//! [`TestApp`] wires the router to in-memory stores, a recording mailer and a
//! manual clock, and keeps handles to all of them so tests can seed data and
//! inspect side effects.

use axum_test::TestServer;
use manna_services::{
    AppState,
    clock::{Clock, ManualClock},
    config::Config,
    documents::MockDocumentStore,
    mail::MockMailer,
    routes,
    users::{
        MockUserStorage, Realm, StoredAccount, TokenSigner, password::hash_secret,
        storage::NewAccount,
    },
};
use std::sync::Arc;

#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "correct-horse";

pub struct TestApp {
    pub server: TestServer,
    pub documents: MockDocumentStore,
    pub users: MockUserStorage,
    pub admins: MockUserStorage,
    pub mailer: MockMailer,
    pub clock: ManualClock,
    pub signer: TokenSigner,
}

pub fn spawn_app() -> TestApp {
    spawn_app_with_config(Config::new_for_test())
}

pub fn spawn_app_with_config(config: Config) -> TestApp {
    let documents = MockDocumentStore::new();
    let users = MockUserStorage::new();
    let admins = MockUserStorage::new();
    let mailer = MockMailer::new();
    let clock = ManualClock::default();
    let signer = TokenSigner::from_config(&config);

    let state = AppState::with_clock(
        documents.clone(),
        users.clone(),
        admins.clone(),
        mailer.clone(),
        signer.clone(),
        Arc::new(clock.clone()),
    );
    let server = TestServer::new(routes(state, config)).unwrap();

    TestApp {
        server,
        documents,
        users,
        admins,
        mailer,
        clock,
        signer,
    }
}

#[allow(dead_code)]
impl TestApp {
    /// Stores an account with [`TEST_PASSWORD`] directly in the realm's store.
    pub fn seed_account(&self, realm: Realm, email: &str) -> StoredAccount {
        let account = StoredAccount::new(NewAccount {
            name: "Test Account".to_owned(),
            email: email.to_owned(),
            password_hash: hash_secret(TEST_PASSWORD).unwrap(),
            role: realm.default_role().to_owned(),
            ..NewAccount::default()
        });
        let store = match realm {
            Realm::User => &self.users,
            Realm::Admin => &self.admins,
        };
        let _ = store.clone().with_account(account.clone());
        account
    }

    /// A valid access token for `account` in `realm`.
    pub fn token_for(&self, account: &StoredAccount, realm: Realm) -> String {
        self.signer
            .sign_access(account, realm, self.clock.now())
            .unwrap()
    }

    /// Seeds an admin and returns its access token.
    pub fn admin_token(&self) -> String {
        let admin = self.seed_account(Realm::Admin, "admin@example.com");
        self.token_for(&admin, Realm::Admin)
    }
}
