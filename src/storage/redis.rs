use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client, Script};

use super::KeyValueStore;
use crate::error::AppResult;

// KEYS[1] key; ARGV[1] "1" when the key must be absent, ARGV[2] expected,
// ARGV[3] new value.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current then return 0 end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: "sticker".to_string(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key(key), value).await?;
        Ok(())
    }

    async fn get_or_create(&self, key: &str, value: &str) -> AppResult<String> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let _: bool = conn.set_nx(&key, value).await?;
        let stored: Option<String> = conn.get(&key).await?;
        Ok(stored.unwrap_or_else(|| value.to_string()))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let swapped: i32 = Script::new(COMPARE_AND_SET)
            .key(self.key(key))
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, by: i64) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(self.key(key), by).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }
}
