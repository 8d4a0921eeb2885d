// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed catalog and token store.
//!
//! The core treats the catalog as opaque: repositories return plain records
//! through iterator-like cursors. Driver rows feed the sandbox driver set;
//! `api_tokens` backs transport authentication.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hwpid INTEGER NOT NULL,
    name TEXT NOT NULL,
    os_build INTEGER NOT NULL DEFAULT 0,
    dpa_version INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS drivers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    peripheral_number INTEGER,
    version REAL NOT NULL DEFAULT 0,
    code TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS product_drivers (
    product_id INTEGER NOT NULL REFERENCES products(id),
    driver_id INTEGER NOT NULL REFERENCES drivers(id),
    PRIMARY KEY (product_id, driver_id)
);
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address INTEGER NOT NULL UNIQUE,
    product_id INTEGER REFERENCES products(id),
    discovered INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS binary_outputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS lights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS sensors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type INTEGER NOT NULL,
    name TEXT NOT NULL,
    unit TEXT
);
CREATE TABLE IF NOT EXISTS device_sensors (
    device_id INTEGER NOT NULL REFERENCES devices(id),
    sensor_id INTEGER NOT NULL REFERENCES sensors(id),
    idx INTEGER NOT NULL,
    PRIMARY KEY (device_id, sensor_id, idx)
);
CREATE TABLE IF NOT EXISTS api_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    salt TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL DEFAULT 0,
    revoked INTEGER NOT NULL DEFAULT 0,
    service INTEGER NOT NULL DEFAULT 0
);
";

/// Iterator-like cursor over repository rows.
pub struct Cursor<T>(std::vec::IntoIter<T>);

impl<T> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.next()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverRecord {
    pub id: i64,
    pub name: String,
    pub peripheral_number: Option<i64>,
    pub version: f64,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: i64,
    pub hwpid: u16,
    pub name: String,
    pub os_build: u16,
    pub dpa_version: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: i64,
    pub address: u8,
    pub product_id: Option<i64>,
    pub discovered: bool,
}

/// Stored API token row; `salt` and `hash` are base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTokenRecord {
    pub id: u32,
    pub owner: String,
    pub salt: String,
    pub hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub service: bool,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MIGRATIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MIGRATIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let conn = self.conn.lock().map_err(|_| rusqlite::Error::InvalidQuery)?;
        f(&conn)
    }

    // -- Drivers ---------------------------------------------------------------

    pub fn drivers(&self) -> rusqlite::Result<Cursor<DriverRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, peripheral_number, version, code FROM drivers
                 ORDER BY name, version",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DriverRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        peripheral_number: row.get(2)?,
                        version: row.get(3)?,
                        code: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Cursor(rows.into_iter()))
        })
    }

    pub fn insert_driver(
        &self,
        name: &str,
        peripheral_number: Option<i64>,
        version: f64,
        code: &str,
    ) -> rusqlite::Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO drivers (name, peripheral_number, version, code)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, peripheral_number, version, code],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Concatenate every stored driver into one loadable script.
    pub fn driver_code_bundle(&self) -> rusqlite::Result<String> {
        let mut bundle = String::new();
        for driver in self.drivers()? {
            bundle.push_str(&driver.code);
            bundle.push('\n');
        }
        Ok(bundle)
    }

    // -- Catalog ---------------------------------------------------------------

    pub fn products(&self) -> rusqlite::Result<Cursor<ProductRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, hwpid, name, os_build, dpa_version FROM products")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ProductRecord {
                        id: row.get(0)?,
                        hwpid: row.get::<_, i64>(1)? as u16,
                        name: row.get(2)?,
                        os_build: row.get::<_, i64>(3)? as u16,
                        dpa_version: row.get::<_, i64>(4)? as u16,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Cursor(rows.into_iter()))
        })
    }

    pub fn devices(&self) -> rusqlite::Result<Cursor<DeviceRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, address, product_id, discovered FROM devices")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(DeviceRecord {
                        id: row.get(0)?,
                        address: row.get::<_, i64>(1)? as u8,
                        product_id: row.get(2)?,
                        discovered: row.get::<_, i64>(3)? != 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Cursor(rows.into_iter()))
        })
    }

    // -- API tokens ------------------------------------------------------------

    pub fn api_token(&self, id: u32) -> rusqlite::Result<Option<ApiTokenRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, owner, salt, hash, created_at, expires_at, revoked, service
                 FROM api_tokens WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ApiTokenRecord {
                        id: row.get::<_, i64>(0)? as u32,
                        owner: row.get(1)?,
                        salt: row.get(2)?,
                        hash: row.get(3)?,
                        created_at: row.get(4)?,
                        expires_at: row.get(5)?,
                        revoked: row.get::<_, i64>(6)? != 0,
                        service: row.get::<_, i64>(7)? != 0,
                    })
                },
            )
            .optional()
        })
    }

    pub fn insert_api_token(
        &self,
        owner: &str,
        salt: &str,
        hash: &str,
        created_at: i64,
        expires_at: i64,
        service: bool,
    ) -> rusqlite::Result<u32> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_tokens (owner, salt, hash, created_at, expires_at, revoked, service)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![owner, salt, hash, created_at, expires_at, service],
            )?;
            Ok(conn.last_insert_rowid() as u32)
        })
    }

    pub fn revoke_api_token(&self, id: u32) -> rusqlite::Result<bool> {
        self.with_conn(|conn| {
            let changed =
                conn.execute("UPDATE api_tokens SET revoked = 1 WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
