use std::sync::{Arc, PoisonError, RwLock};

use redis::{ErrorKind, RedisResult, ToRedisArgs, Value, aio::ConnectionManager};

use crate::TollgateError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScriptRegistration {
    Unregistered,
    Registered(Arc<str>),
}

/// A Lua script loaded into Redis once and invoked by its SHA1 handle afterwards.
///
/// Registration is `Unregistered -> Registered(sha)`. Concurrent callers may race to register;
/// `SCRIPT LOAD` is idempotent for identical source, so the loser simply adopts the handle that
/// is already stored. When Redis answers `NOSCRIPT` (script cache flushed, failover to a
/// replica that never saw the script) the handle is dropped and the script is loaded again
/// before a single re-invocation.
#[derive(Debug)]
pub(crate) struct RegisteredScript {
    name: &'static str,
    source: &'static str,
    registration: RwLock<ScriptRegistration>,
}

impl RegisteredScript {
    pub(crate) fn new(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            source,
            registration: RwLock::new(ScriptRegistration::Unregistered),
        }
    }

    pub(crate) fn handle(&self) -> Option<Arc<str>> {
        match &*self.registration.read().unwrap_or_else(PoisonError::into_inner) {
            ScriptRegistration::Registered(sha) => Some(Arc::clone(sha)),
            ScriptRegistration::Unregistered => None,
        }
    }

    /// Load the script unless a handle is already known, and return the handle.
    pub(crate) async fn register(
        &self,
        connection_manager: &mut ConnectionManager,
    ) -> Result<Arc<str>, TollgateError> {
        if let Some(sha) = self.handle() {
            return Ok(sha);
        }

        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(self.source)
            .query_async(connection_manager)
            .await?;

        let mut registration = self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let ScriptRegistration::Registered(existing) = &*registration {
            return Ok(Arc::clone(existing));
        }

        let sha: Arc<str> = Arc::from(sha);
        *registration = ScriptRegistration::Registered(Arc::clone(&sha));
        tracing::debug!(script = self.name, sha = %sha, "redis.script.registered");

        Ok(sha)
    }

    fn invalidate(&self, stale: &str) {
        let mut registration = self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if matches!(&*registration, ScriptRegistration::Registered(sha) if &**sha == stale) {
            *registration = ScriptRegistration::Unregistered;
        }
    }

    /// Run the script against a single key.
    pub(crate) async fn invoke<A>(
        &self,
        connection_manager: &mut ConnectionManager,
        key: &str,
        args: &A,
    ) -> Result<Value, TollgateError>
    where
        A: ToRedisArgs + Sync,
    {
        let sha = self.register(connection_manager).await?;

        match evalsha(connection_manager, &sha, key, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                tracing::debug!(
                    script = self.name,
                    sha = %sha,
                    "redis.script.missing, registering again"
                );
                self.invalidate(&sha);

                let sha = self.register(connection_manager).await?;
                Ok(evalsha(connection_manager, &sha, key, args).await?)
            }
            result => Ok(result?),
        }
    }
}

async fn evalsha<A>(
    connection_manager: &mut ConnectionManager,
    sha: &str,
    key: &str,
    args: &A,
) -> RedisResult<Value>
where
    A: ToRedisArgs + Sync,
{
    redis::cmd("EVALSHA")
        .arg(sha)
        .arg(1)
        .arg(key)
        .arg(args)
        .query_async(connection_manager)
        .await
}
