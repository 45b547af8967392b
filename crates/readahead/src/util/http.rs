use std::ops::Deref;

use reqwest::{Client, ClientBuilder};

use crate::ReadaheadResult;

/// Cheaply clonable HTTP client shared by the manifest loader and the downloader.
#[derive(Clone, Default)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> ReadaheadResult<Self> {
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl From<Client> for HttpClient {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
