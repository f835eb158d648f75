// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::Result;
use crate::clock::Clock;
use crate::errors::Error;
use crate::token::{Token, TokenProvider};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::sync::{Arc, Mutex};

type Refresh = Shared<BoxFuture<'static, Result<Token>>>;

/// Caches the session token and coalesces concurrent refreshes.
///
/// At most one refresh is in flight at any time. Callers arriving while a
/// refresh is in flight wait for it and receive the same token, or the same
/// error.
#[derive(Debug)]
pub(crate) struct TokenCache {
    state: Arc<Mutex<State>>,
    // The token provider. This thing does the refreshing.
    inner: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct State {
    token: Option<Token>,
    // The in-flight refresh, if any. Only waiters hold strong references, so
    // the refresh is dropped (and its request aborted) once every waiter is
    // gone.
    refresh: Option<(u64, WeakShared<BoxFuture<'static, Result<Token>>>)>,
    generation: u64,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("token", &self.token)
            .field("refresh_in_progress", &self.refresh.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

// We manually implement the `Clone` trait to share the state between clones.
impl Clone for TokenCache {
    fn clone(&self) -> TokenCache {
        TokenCache {
            state: self.state.clone(),
            inner: self.inner.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl TokenCache {
    pub(crate) fn new(inner: Arc<dyn TokenProvider>, clock: Arc<dyn Clock>) -> TokenCache {
        TokenCache {
            state: Arc::new(Mutex::new(State::default())),
            inner,
            clock,
        }
    }

    /// Returns a token that has not expired, refreshing it if needed.
    pub(crate) async fn token(&self) -> Result<Token> {
        let (id, refresh) = match self.cached_or_refresh() {
            Ok(token) => return Ok(token),
            Err(refresh) => refresh,
        };

        // Keep `refresh` alive until the result is stored, callers arriving
        // in between must find the completed refresh, not start a new one.
        let result = refresh.clone().await;

        {
            let mut state = self.state.lock().expect("token cache lock is poisoned");
            // Only the first waiter to finish stores the result.
            if state.refresh.as_ref().is_some_and(|(g, _)| *g == id) {
                state.refresh = None;
                if let Ok(token) = &result {
                    state.token = Some(token.clone());
                }
            }
        }
        drop(refresh);

        let token = result?;
        // Check freshness at read time, the refresh may have taken longer
        // than the token lifetime.
        if !token.is_valid_at(self.clock.now()) {
            return Err(Error::token_acquisition(
                true,
                "session token expired before use",
                std::io::Error::other("expired"),
            ));
        }
        Ok(token)
    }

    /// Drops `rejected` from the cache, the next call to `token()` refreshes
    /// it.
    ///
    /// A newer token, acquired by another caller after `rejected` was handed
    /// out, is kept.
    pub(crate) fn invalidate(&self, rejected: &Token) {
        let mut state = self.state.lock().expect("token cache lock is poisoned");
        if state.token.as_ref() != Some(rejected) {
            tracing::debug!("session token already replaced");
            return;
        }
        tracing::debug!("session token invalidated");
        state.token = None;
    }

    // Returns the cached token if it is still valid. Otherwise returns the
    // in-flight refresh, starting one if needed.
    fn cached_or_refresh(&self) -> std::result::Result<Token, (u64, Refresh)> {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("token cache lock is poisoned");

        if let Some(token) = state.token.as_ref().filter(|t| t.is_valid_at(now)) {
            tracing::debug!("using cached session token");
            return Ok(token.clone());
        }

        // There is already a refresh. We will await its result.
        if let Some((id, refresh)) = state
            .refresh
            .as_ref()
            .and_then(|(id, weak)| weak.upgrade().map(|r| (*id, r)))
        {
            return Err((id, refresh));
        }

        // No refreshes. We should start one.
        state.generation += 1;
        let id = state.generation;
        let inner = self.inner.clone();
        let refresh = async move { inner.token().await }.boxed().shared();
        state.refresh = refresh.downgrade().map(|weak| (id, weak));
        tracing::debug!(generation = id, "refreshing session token");
        Err((id, refresh))
    }
}
