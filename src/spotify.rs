/*!
Spotify Web API reads, normalized into the app's track and playlist shapes.

Public playlist reads use the client-credentials token. A user's own
playlists use that user's access token and are only available to
accepted accounts.
*/
use regex::Regex;

use crate::context::Context;
use crate::http::{self, HttpRequest};
use crate::models::{Account, Playlist, PlaylistInfo, PlaylistOwner, Track};
use crate::oauth;
use crate::{Error, Result, LOG};

pub const TRACK_PAGE_LIMIT: u32 = 20;
pub const PLAYLIST_PAGE_LIMIT: u32 = 50;

lazy_static::lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"[\(\[].*?[\)\]]").expect("bracket regex");
    static ref SUFFIX: Regex = Regex::new(r"[-|].*").expect("suffix regex");
    static ref SPACES: Regex = Regex::new(r"\s{2,}").expect("spaces regex");
}

/// Strip `(...)`/`[...]` annotations and anything after the first `-`
/// or `|` from a track title, then collapse runs of whitespace.
///
/// `"Song (Remix) - Live"` becomes `"Song "`.
pub fn clean_title(title: &str) -> String {
    let s = BRACKETED.replace_all(title, "");
    let s = SUFFIX.replace(&s, "");
    SPACES.replace_all(&s, " ").into_owned()
}

#[derive(serde::Deserialize, Debug)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct ApiImage {
    url: String,
}

#[derive(serde::Deserialize, Debug)]
struct ApiArtist {
    name: String,
}

#[derive(serde::Deserialize, Debug)]
struct ApiAlbum {
    #[serde(default)]
    images: Option<Vec<ApiImage>>,
}

#[derive(serde::Deserialize, Debug)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    #[serde(default)]
    external_urls: ExternalUrls,
    album: Option<ApiAlbum>,
    preview_url: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct PlaylistItem {
    // null for tracks removed from the catalog
    track: Option<ApiTrack>,
}

#[derive(serde::Deserialize, Debug)]
struct ApiOwner {
    id: String,
    display_name: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(serde::Deserialize, Debug)]
struct ApiPlaylist {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Option<Vec<ApiImage>>,
    owner: ApiOwner,
}

impl From<ApiTrack> for Track {
    fn from(t: ApiTrack) -> Self {
        let cover = t
            .album
            .and_then(|a| a.images)
            .and_then(|images| images.into_iter().next())
            .map(|i| i.url);
        Track {
            id: t.id.unwrap_or_default(),
            artist: t
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_default(),
            title: clean_title(&t.name),
            link: t.external_urls.spotify.unwrap_or_default(),
            cover,
            preview: t.preview_url,
        }
    }
}

impl From<&ApiOwner> for PlaylistOwner {
    fn from(o: &ApiOwner) -> Self {
        PlaylistOwner {
            id: o.id.clone(),
            name: o.display_name.clone(),
            href: o.external_urls.spotify.clone().unwrap_or_default(),
        }
    }
}

/// A playlist is only shown when it has a cover and a name
fn listable(p: ApiPlaylist) -> Option<Playlist> {
    let name = p.name.filter(|n| !n.is_empty())?;
    let image = p.images.and_then(|i| i.into_iter().next())?.url;
    Some(Playlist {
        id: p.id,
        name,
        description: p.description.unwrap_or_default(),
        href: p.external_urls.spotify.unwrap_or_default(),
        image,
    })
}

/// Spotify ids are base-62, anything else never reaches a url path
fn checked_id(playlist_id: &str) -> Result<&str> {
    let id = playlist_id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "invalid playlist id {:?}",
            playlist_id
        )));
    }
    Ok(id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPage {
    pub tracks: Vec<Track>,
    pub last_page: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPlaylists {
    pub success: bool,
    pub details: String,
    pub owner: Option<PlaylistOwner>,
    pub playlists: Vec<Playlist>,
    pub last_page: bool,
}

impl UserPlaylists {
    fn rejected(details: &str) -> Self {
        Self {
            success: false,
            details: details.to_string(),
            owner: None,
            playlists: vec![],
            last_page: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDetail {
    pub playlist: PlaylistInfo,
    pub tracks: Vec<Track>,
    pub last_page: bool,
}

async fn track_page(
    ctx: &Context,
    playlist_id: &str,
    offset: u32,
    limit: u32,
    skip_empty: bool,
) -> Result<TrackPage> {
    let id = checked_id(playlist_id)?;
    let token = oauth::catalog_access_token(ctx).await?;
    let url = ctx.config.spotify_api(&format!(
        "/playlists/{}/tracks?limit={}&offset={}",
        id, limit, offset
    ));
    let page: Page<PlaylistItem> =
        http::execute_json(ctx.http.as_ref(), ctx.retry_policy(), &HttpRequest::get(url).bearer(&token))
            .await?;
    let last_page = page.next.is_none();
    let tracks = page
        .items
        .into_iter()
        .filter_map(|item| item.track)
        .filter(|t| !skip_empty || t.duration_ms != 0)
        .map(Track::from)
        .collect::<Vec<_>>();
    slog::debug!(
        LOG, "fetched playlist tracks";
        "playlist_id" => id,
        "offset" => offset,
        "count" => tracks.len(),
        "last_page" => last_page,
    );
    Ok(TrackPage { tracks, last_page })
}

/// A page of a public playlist's tracks
pub async fn fetch_playlist_tracks(
    ctx: &Context,
    playlist_id: &str,
    offset: u32,
    limit: u32,
) -> Result<TrackPage> {
    track_page(ctx, playlist_id, offset, limit, false).await
}

/// The account's own playlists, refreshing its access token if needed.
///
/// Unaccepted accounts and accounts without provider credentials get
/// an unsuccessful result without any upstream call.
pub async fn fetch_user_playlists(
    ctx: &Context,
    account: &Account,
    offset: u32,
) -> Result<UserPlaylists> {
    if !account.accepted_account {
        return Ok(UserPlaylists::rejected("Account not accepted."));
    }
    let token = match oauth::valid_access_token(ctx, account.id).await? {
        Some(t) => t,
        None => return Ok(UserPlaylists::rejected("No access token registered")),
    };
    let url = ctx.config.spotify_api(&format!(
        "/me/playlists?limit={}&offset={}",
        PLAYLIST_PAGE_LIMIT, offset
    ));
    let page: Page<ApiPlaylist> =
        http::execute_json(ctx.http.as_ref(), ctx.retry_policy(), &HttpRequest::get(url).bearer(&token))
            .await?;
    let last_page = page.next.is_none();
    let owner = page.items.first().map(|p| PlaylistOwner::from(&p.owner));
    let total = page.items.len();
    let playlists = page
        .items
        .into_iter()
        .filter_map(listable)
        .collect::<Vec<_>>();
    slog::info!(
        LOG, "fetched user playlists";
        "account_id" => account.id,
        "offset" => offset,
        "received" => total,
        "kept" => playlists.len(),
    );
    Ok(UserPlaylists {
        success: true,
        details: "Playlists successfully fetched.".into(),
        owner,
        playlists,
        last_page,
    })
}

/// Playlist metadata merged with a page of its tracks. Tracks with no
/// duration are left out.
pub async fn fetch_playlist_detail(
    ctx: &Context,
    playlist_id: &str,
    offset: u32,
) -> Result<PlaylistDetail> {
    let id = checked_id(playlist_id)?;
    let token = oauth::catalog_access_token(ctx).await?;
    let url = ctx.config.spotify_api(&format!("/playlists/{}", id));
    let p: ApiPlaylist =
        http::execute_json(ctx.http.as_ref(), ctx.retry_policy(), &HttpRequest::get(url).bearer(&token))
            .await?;
    let playlist = PlaylistInfo {
        playlist_name: p.name.unwrap_or_default(),
        playlist_description: p.description.unwrap_or_default(),
        playlist_url: p.external_urls.spotify.unwrap_or_default(),
        owner_name: p.owner.display_name,
        owner_url: p.owner.external_urls.spotify.unwrap_or_default(),
    };
    let page = track_page(ctx, id, offset, TRACK_PAGE_LIMIT, true).await?;
    Ok(PlaylistDetail {
        playlist,
        tracks: page.tracks,
        last_page: page.last_page,
    })
}
