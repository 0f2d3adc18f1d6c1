//! Archive flow: user, enrolled sections, index page
//!
//! Strings the two clients together the way an archive run has always
//! worked: fetch the logged-in user from the school host, list their
//! course sections, resolve section details through the bulk API (tolerant
//! of forbidden ones), then write an `index.html` pointing at everything
//! the cache now holds.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::api::{
    FetchError, FetchOptions, MultiGetClient, MultiGetError, MultiGetOptions, SessionClient,
};
use crate::cache::file_component;
use crate::html::{
    a, div, em, external_link, h1, h2, li, p, page, span, strong, table, td, th, tr, ul, Html,
};

/// Errors from an archive run
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    MultiGet(#[from] MultiGetError),

    /// A response decoded as JSON, but not into the shape the flow needs
    #[error("unexpected shape for {path}: {source}")]
    Shape {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Writing an output file failed
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// The fields of `/v1/users/me` an archive run uses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: u64,
    pub name_display: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub primary_email: Option<String>,
}

/// One enrolled section from `/v1/users/{id}/sections`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    /// Section ids arrive as strings, unlike user ids
    pub id: String,
    pub course_title: String,
    pub section_title: String,
}

/// Envelope of the sections listing
#[derive(Debug, Deserialize)]
struct ApiSectionsResponse {
    #[serde(default)]
    section: Vec<ApiSection>,
}

/// Runs the archive flow and writes `index.html` under `out_dir`
///
/// `user_id` overrides whose sections are listed; the default is the
/// session's own user.
pub async fn run(
    session: &SessionClient,
    multiget: &MultiGetClient,
    user_id: Option<u64>,
    out_dir: &Path,
) -> Result<(), ArchiveError> {
    let me = fetch_me(session).await?;
    info!("archiving as {} (id {})", me.name_display, me.id);

    let uid = user_id.unwrap_or(me.id);
    let sections = fetch_sections(session, uid).await?;
    info!("found {} sections", sections.len());

    let detail_paths: Vec<String> = sections.iter().map(section_detail_path).collect();
    let details = multiget
        .fetch_many(&detail_paths, MultiGetOptions { allow_forbidden: true })
        .await?;

    let sections_dir = out_dir.join("sections");
    create_dir(&sections_dir)?;
    for section in &sections {
        let detail = details
            .get(&section_detail_path(section))
            .and_then(|entry| entry.as_ref());
        if let Some(detail) = detail {
            let page_path = sections_dir.join(section_page_name(section));
            write_page(&page_path, render_section(section, detail))?;
        }
    }

    let index_path = out_dir.join("index.html");
    write_page(&index_path, render_index(&me, &sections, &details))?;
    info!("wrote {}", index_path.display());
    Ok(())
}

fn create_dir(dir: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(dir).map_err(|source| ArchiveError::Write {
        path: dir.display().to_string(),
        source,
    })
}

fn write_page(path: &Path, content: String) -> Result<(), ArchiveError> {
    fs::write(path, content).map_err(|source| ArchiveError::Write {
        path: path.display().to_string(),
        source,
    })
}

async fn fetch_me(session: &SessionClient) -> Result<ApiUser, ArchiveError> {
    let path = "/v1/users/me";
    let value = session.get_json(path, FetchOptions::default()).await?;
    decode(path, value)
}

async fn fetch_sections(
    session: &SessionClient,
    user_id: u64,
) -> Result<Vec<ApiSection>, ArchiveError> {
    let path = format!("/v1/users/{}/sections", user_id);
    let value = session.get_json(&path, FetchOptions::default()).await?;
    let response: ApiSectionsResponse = decode(&path, value)?;
    Ok(response.section)
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ArchiveError> {
    serde_json::from_value(value).map_err(|source| ArchiveError::Shape {
        path: path.to_string(),
        source,
    })
}

/// Path a section's bulk detail lives under
fn section_detail_path(section: &ApiSection) -> String {
    format!("/v1/sections/{}", section.id)
}

/// File name for one section's page, derived from its titles the same way
/// cache entries get theirs
fn section_page_name(section: &ApiSection) -> String {
    format!(
        "{}.html",
        file_component(&format!("{} {}", section.course_title, section.section_title))
    )
}

/// Renders one archived section's page: titles plus the cached detail
fn render_section(section: &ApiSection, detail: &Value) -> String {
    let detail_text = serde_json::to_string_pretty(detail).unwrap_or_default();
    page([
        h1().text(&format!(
            "{} ({})",
            section.course_title, section.section_title
        ))
        .build(),
        p().text(&format!("Section id {}", section.id)).build(),
        div().text(&detail_text).build(),
    ])
}

/// Renders the archive index page
///
/// Sections the bulk API refused render without a link; API links to
/// archived sections route through the outbound-link redirector like any
/// other external reference.
pub fn render_index(
    me: &ApiUser,
    sections: &[ApiSection],
    details: &BTreeMap<String, Option<Value>>,
) -> String {
    let mut fragments = vec![
        h1().text(&format!("Archive of {}", me.name_display)).build(),
        p().text(&format!("User id {}", me.id)).build(),
    ];
    let mut contact_items = Vec::new();
    if let Some(username) = &me.username {
        contact_items.push(li().text(&format!("Username: {}", username)).build());
    }
    if let Some(email) = &me.primary_email {
        contact_items.push(li().text(&format!("Email: {}", email)).build());
    }
    if !contact_items.is_empty() {
        fragments.push(ul().children(contact_items).build());
    }

    fragments.push(h2().text("Sections").build());
    let mut rows = vec![tr()
        .child(th().text("Course").build())
        .child(th().text("Section").build())
        .child(th().text("Status").build())
        .build()];
    for section in sections {
        let detail = details
            .get(&section_detail_path(section))
            .and_then(|entry| entry.as_ref());
        rows.push(
            tr()
                .child(td().text(&section.course_title).build())
                .child(td().text(&section.section_title).build())
                .child(td().child(section_status(section, detail)).build())
                .build(),
        );
    }
    fragments.push(table().children(rows).build());
    fragments.push(
        p().text(&format!(
            "Generated {}",
            Local::now().format("%Y-%m-%d %H:%M")
        ))
        .build(),
    );

    page(fragments)
}

/// Status cell for one section: a link to the local page when archived
/// (with the live API reference routed through the redirector), a note
/// when the bulk API refused it
fn section_status(section: &ApiSection, detail: Option<&Value>) -> Html {
    let Some(detail) = detail else {
        return em().text("not accessible").build();
    };

    let local = a()
        .attr("href", format!("sections/{}", section_page_name(section)))
        .child(strong().text("archived").build())
        .build();
    match api_url(detail) {
        Some(url) => span()
            .child(local)
            .child(Html::raw(" "))
            .child(a().attr("href", external_link(url)).text("api").build())
            .build(),
        None => local,
    }
}

/// The section's canonical URL on the API host, when the detail carries one
fn api_url(detail: &Value) -> Option<&str> {
    detail.get("links")?.get("self")?.as_str()
}

// ============================================================================
// Tests
// ============================================================================
