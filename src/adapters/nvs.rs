//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`StoragePort`] (binding tables) and [`ConfigPort`]
//! (WiFi / MQTT credentials) for the gateway.
//!
//! | Namespace | Key           | Contents                        |
//! |-----------|---------------|---------------------------------|
//! | `mesh`    | `_BIND_KEY_`  | mesh binding table (postcard)   |
//! | `mesh`    | `_GATTC_KEY_` | GATT-client binding table       |
//! | `mesh`    | `wifi_key`    | [`WifiConfig`] (postcard)       |
//! | `mesh`    | `mqtt_key`    | [`MqttConfig`] (postcard)       |
//!
//! Every blob is read whole and written whole; ESP-IDF commits are atomic
//! per `nvs_commit()`.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::binding::NVS_NAMESPACE;
use crate::config::{MqttConfig, WifiConfig};
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

pub const WIFI_KEY: &str = "wifi_key";
pub const MQTT_KEY: &str = "mqtt_key";

/// Credential blobs are tiny; anything larger is corruption.
const MAX_CONFIG_BLOB: usize = 256;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS
            // access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NVS names are limited to 15 bytes plus the terminator.
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let len = name.len().min(15);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        buf
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    // ── Blob primitives shared by both ports ──────────────────

    fn get_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            let store = self.store.borrow();
            let data = store.get(&composite).ok_or(StorageError::NotFound)?;
            if data.len() > buf.len() {
                return Err(StorageError::TooLarge);
            }
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = Self::c_name(key);
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key_buf.as_ptr().cast(),
                        buf.as_mut_ptr().cast(),
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(StorageError::TooLarge),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn put_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = Self::c_name(key);
                let ret = unsafe {
                    nvs_set_blob(handle, key_buf.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn erase_blob(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let key_buf = Self::c_name(key);
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr().cast()) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|_| StorageError::IoError)
        }
    }

    fn load_config<T: serde::de::DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, ConfigError> {
        let mut buf = [0u8; MAX_CONFIG_BLOB];
        match self.get_blob(NVS_NAMESPACE, key, &mut buf) {
            Ok(len) => postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted),
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored {}, using defaults", key);
                Ok(T::default())
            }
            Err(StorageError::TooLarge) => Err(ConfigError::Corrupted),
            Err(e) => {
                warn!("NvsAdapter: reading {} failed: {}", key, e);
                Err(ConfigError::IoError)
            }
        }
    }

    fn save_config<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let bytes = postcard::to_allocvec(value).map_err(|_| ConfigError::IoError)?;
        self.put_blob(NVS_NAMESPACE, key, &bytes).map_err(|e| match e {
            StorageError::Full => ConfigError::StorageFull,
            _ => ConfigError::IoError,
        })?;
        info!("NvsAdapter: {} saved ({} bytes)", key, bytes.len());
        Ok(())
    }
}

fn validate_wifi(cfg: &WifiConfig) -> Result<(), ConfigError> {
    if cfg.ssid.is_empty() {
        return Err(ConfigError::ValidationFailed("ssid must not be empty"));
    }
    let pw = cfg.password.len();
    if pw != 0 && !(8..=64).contains(&pw) {
        return Err(ConfigError::ValidationFailed(
            "wifi password must be empty or 8-64 bytes",
        ));
    }
    Ok(())
}

fn validate_mqtt(cfg: &MqttConfig) -> Result<(), ConfigError> {
    if cfg.host.is_empty() {
        return Err(ConfigError::ValidationFailed("mqtt host must not be empty"));
    }
    if cfg.port == 0 {
        return Err(ConfigError::ValidationFailed("mqtt port must be non-zero"));
    }
    if cfg.qos > 2 {
        return Err(ConfigError::ValidationFailed("mqtt qos must be 0-2"));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load_wifi(&self) -> Result<WifiConfig, ConfigError> {
        self.load_config(WIFI_KEY)
    }

    fn save_wifi(&self, cfg: &WifiConfig) -> Result<(), ConfigError> {
        validate_wifi(cfg)?;
        self.save_config(WIFI_KEY, cfg)
    }

    fn load_mqtt(&self) -> Result<MqttConfig, ConfigError> {
        self.load_config(MQTT_KEY)
    }

    fn save_mqtt(&self, cfg: &MqttConfig) -> Result<(), ConfigError> {
        validate_mqtt(cfg)?;
        self.save_config(MQTT_KEY, cfg)
    }

    fn reset_network(&self) -> Result<(), ConfigError> {
        for key in [WIFI_KEY, MQTT_KEY] {
            self.erase_blob(NVS_NAMESPACE, key)
                .map_err(|_| ConfigError::IoError)?;
        }
        info!("NvsAdapter: network credentials erased");
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.get_blob(namespace, key, buf)
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.put_blob(namespace, key, data)
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.erase_blob(namespace, key)
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let key_buf = Self::c_name(key);
                let ret =
                    unsafe { nvs_find_key(handle, key_buf.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}
