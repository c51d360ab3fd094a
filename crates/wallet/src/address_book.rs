//! Destination labels and purposes, per-destination data, and the contract book.

use std::collections::BTreeMap;

use yupost_primitives::encoding::{DecodeError, Decoder, Encoder};
use yupost_primitives::Destination;

use crate::events::ChangeType;

pub const PURPOSE_RECEIVE: &str = "receive";
pub const PURPOSE_SEND: &str = "send";
pub const PURPOSE_REFUND: &str = "refund";

/// Destination data key marking an address that has already been spent from.
pub const USED_KEY: &str = "used";

/// An entry without a label is change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressBookEntry {
    pub label: Option<String>,
    pub purpose: String,
    pub dest_data: BTreeMap<String, String>,
}

impl AddressBookEntry {
    pub fn is_change(&self) -> bool {
        self.label.is_none()
    }

    pub fn label_str(&self) -> &str {
        self.label.as_deref().unwrap_or_default()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bool(self.label.is_some());
        encoder.write_var_str(self.label_str());
        encoder.write_var_str(&self.purpose);
        encoder.into_inner()
    }

    /// Decodes the label and purpose; destination data lives in its own column.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let has_label = decoder.read_bool()?;
        let label = decoder.read_var_str()?;
        let purpose = decoder.read_var_str()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            label: has_label.then_some(label),
            purpose,
            dest_data: BTreeMap::new(),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct AddressBook {
    entries: BTreeMap<Destination, AddressBookEntry>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, destination: &Destination) -> Option<&AddressBookEntry> {
        self.entries.get(destination)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Destination, &AddressBookEntry)> {
        self.entries.iter()
    }

    /// Names `destination`, which also clears its change classification. An empty
    /// `purpose` keeps the current one.
    pub fn set(&mut self, destination: Destination, label: &str, purpose: &str) -> ChangeType {
        let change = if self.entries.contains_key(&destination) {
            ChangeType::Updated
        } else {
            ChangeType::New
        };
        let entry = self.entries.entry(destination).or_default();
        entry.label = Some(label.to_string());
        if !purpose.is_empty() {
            entry.purpose = purpose.to_string();
        }
        change
    }

    pub fn insert_entry(&mut self, destination: Destination, entry: AddressBookEntry) {
        self.entries.insert(destination, entry);
    }

    pub fn remove(&mut self, destination: &Destination) -> Option<AddressBookEntry> {
        self.entries.remove(destination)
    }

    pub fn set_dest_data(&mut self, destination: Destination, key: &str, value: &str) {
        self.entries
            .entry(destination)
            .or_default()
            .dest_data
            .insert(key.to_string(), value.to_string());
    }

    pub fn erase_dest_data(&mut self, destination: &Destination, key: &str) -> bool {
        self.entries
            .get_mut(destination)
            .is_some_and(|entry| entry.dest_data.remove(key).is_some())
    }

    pub fn dest_data(&self, destination: &Destination, key: &str) -> Option<&str> {
        self.entries
            .get(destination)
            .and_then(|entry| entry.dest_data.get(key))
            .map(String::as_str)
    }

    pub fn is_used(&self, destination: &Destination) -> bool {
        self.dest_data(destination, USED_KEY).is_some()
    }
}

/// Key of one destination data record: the encoded address, a zero byte, then the data key.
pub fn dest_data_key(address: &str, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(address.len() + key.len() + 1);
    out.extend_from_slice(address.as_bytes());
    out.push(0);
    out.extend_from_slice(key.as_bytes());
    out
}

pub fn split_dest_data_key(raw: &[u8]) -> Option<(&str, &str)> {
    let split = raw.iter().position(|byte| *byte == 0)?;
    let address = std::str::from_utf8(&raw[..split]).ok()?;
    let key = std::str::from_utf8(&raw[split + 1..]).ok()?;
    Some((address, key))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContractBookEntry {
    pub name: String,
    pub abi: String,
}

impl ContractBookEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_var_str(&self.name);
        encoder.write_var_str(&self.abi);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let name = decoder.read_var_str()?;
        let abi = decoder.read_var_str()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { name, abi })
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContractBook {
    entries: BTreeMap<String, ContractBookEntry>,
}

impl ContractBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, address: &str) -> Option<&ContractBookEntry> {
        self.entries.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContractBookEntry)> {
        self.entries.iter()
    }

    pub fn set(&mut self, address: &str, entry: ContractBookEntry) -> ChangeType {
        match self.entries.insert(address.to_string(), entry) {
            Some(_) => ChangeType::Updated,
            None => ChangeType::New,
        }
    }

    pub fn remove(&mut self, address: &str) -> Option<ContractBookEntry> {
        self.entries.remove(address)
    }
}
