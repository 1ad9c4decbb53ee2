/*!
GraphQL queries and mutations.

The app `Context` is schema data. The signed-in `Viewer`, if any, is
attached to each request by the http layer.
*/
use async_graphql::{EmptySubscription, Object, Schema, SimpleObject, ID};
use chrono::{DateTime, Utc};

use crate::accounts::{self, Granted, Viewer};
use crate::context::Context;
use crate::models::{Account, OAuthCredential, Playlist, PlaylistInfo, PlaylistOwner, Track, PROVIDER_SPOTIFY};
use crate::{oauth, spotify, Error, Result, LOG};

pub type MusikSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub const AUTH_REQUIRED: &str = "Authentication Failure: You must be signed in";

pub fn build(ctx: Context) -> MusikSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(ctx)
        .finish()
}

/// Internal failures are logged here and reach the client without
/// their details
fn gql_err(e: Error) -> async_graphql::Error {
    match e {
        Error::Validation(_)
        | Error::Conflict(_)
        | Error::Auth(_)
        | Error::Upstream { .. }
        | Error::Http(_) => async_graphql::Error::new(e.to_string()),
        _ => {
            slog::error!(LOG, "graphql resolver error"; "error" => %e);
            async_graphql::Error::new("Internal server error")
        }
    }
}

fn app<'a>(gql: &async_graphql::Context<'a>) -> async_graphql::Result<&'a Context> {
    gql.data::<Context>()
}

fn viewer<'a>(gql: &async_graphql::Context<'a>) -> async_graphql::Result<&'a Viewer> {
    gql.data_opt::<Viewer>()
        .ok_or_else(|| async_graphql::Error::new(AUTH_REQUIRED))
}

fn page_offset(offset: Option<i32>) -> Result<u32> {
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(Error::Validation(format!("offset must be positive, got {}", offset)));
    }
    Ok(offset as u32)
}

/// An account, as seen through the api
pub struct UserNode {
    account: Account,
}

impl UserNode {
    async fn credential(
        &self,
        gql: &async_graphql::Context<'_>,
    ) -> async_graphql::Result<Option<OAuthCredential>> {
        let ctx = app(gql)?;
        ctx.store
            .credential(self.account.id, PROVIDER_SPOTIFY)
            .await
            .map_err(gql_err)
    }
}

#[Object(name = "User")]
impl UserNode {
    async fn id(&self) -> ID {
        ID(self.account.id.to_string())
    }

    async fn username(&self) -> &str {
        &self.account.username
    }

    async fn email(&self) -> &str {
        &self.account.email
    }

    async fn accepted_account(&self) -> bool {
        self.account.accepted_account
    }

    async fn profile_picture(&self) -> Option<&str> {
        self.account.profile_picture.as_deref()
    }

    async fn created(&self) -> DateTime<Utc> {
        self.account.created
    }

    async fn spotify_token_expires_at(
        &self,
        gql: &async_graphql::Context<'_>,
    ) -> async_graphql::Result<Option<DateTime<Utc>>> {
        Ok(self.credential(gql).await?.map(|c| c.expires_at))
    }

    async fn has_spotify_token(&self, gql: &async_graphql::Context<'_>) -> async_graphql::Result<bool> {
        Ok(self.credential(gql).await?.is_some())
    }

    async fn has_spotify_refresh_token(
        &self,
        gql: &async_graphql::Context<'_>,
    ) -> async_graphql::Result<bool> {
        Ok(self
            .credential(gql)
            .await?
            .map(|c| !c.refresh_token.is_empty())
            .unwrap_or(false))
    }

    /// True when there is no usable access token
    async fn is_access_token_expired(
        &self,
        gql: &async_graphql::Context<'_>,
    ) -> async_graphql::Result<bool> {
        Ok(self
            .credential(gql)
            .await?
            .map(|c| oauth::is_expired(c.expires_at))
            .unwrap_or(true))
    }
}

#[derive(SimpleObject)]
pub struct PlaylistData {
    success: bool,
    tracks: Vec<Track>,
    last_page: bool,
}

#[derive(SimpleObject)]
pub struct SpecificPlaylistData {
    success: bool,
    playlist: PlaylistInfo,
    tracks: Vec<Track>,
    last_page: bool,
}

#[derive(SimpleObject)]
pub struct UserPlaylistsData {
    success: bool,
    details: String,
    owner: Option<PlaylistOwner>,
    playlists: Vec<Playlist>,
    last_page: bool,
}

#[derive(SimpleObject)]
pub struct AuthLink {
    success: bool,
    href: String,
}

/// Result of every account mutation
#[derive(SimpleObject, Debug)]
pub struct AccountResult {
    success: bool,
    token: Option<String>,
    refresh_token: Option<String>,
    details: String,
}

impl AccountResult {
    /// Bad input and bad credentials are answered with
    /// `success: false`, anything else is a graphql error
    fn from_outcome(outcome: Result<Granted>) -> async_graphql::Result<Self> {
        match outcome {
            Ok(granted) => Ok(Self {
                success: true,
                token: Some(granted.session.token),
                refresh_token: Some(granted.session.refresh_token),
                details: granted.details,
            }),
            Err(e) if e.is_user_facing() => Ok(Self {
                success: false,
                token: None,
                refresh_token: None,
                details: e.to_string(),
            }),
            Err(e) => Err(gql_err(e)),
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// A page of a public playlist's tracks
    async fn my_playlist_suggestions(
        &self,
        gql: &async_graphql::Context<'_>,
        playlist_id: String,
        offset: Option<i32>,
    ) -> async_graphql::Result<PlaylistData> {
        let ctx = app(gql)?;
        let offset = page_offset(offset).map_err(gql_err)?;
        let page = spotify::fetch_playlist_tracks(ctx, &playlist_id, offset, spotify::TRACK_PAGE_LIMIT)
            .await
            .map_err(gql_err)?;
        Ok(PlaylistData {
            success: true,
            tracks: page.tracks,
            last_page: page.last_page,
        })
    }

    /// The signed-in user's own playlists
    async fn user_playlists(
        &self,
        gql: &async_graphql::Context<'_>,
        offset: Option<i32>,
    ) -> async_graphql::Result<UserPlaylistsData> {
        let ctx = app(gql)?;
        let viewer = viewer(gql)?;
        let offset = page_offset(offset).map_err(gql_err)?;
        let res = spotify::fetch_user_playlists(ctx, &viewer.account, offset)
            .await
            .map_err(gql_err)?;
        Ok(UserPlaylistsData {
            success: res.success,
            details: res.details,
            owner: res.owner,
            playlists: res.playlists,
            last_page: res.last_page,
        })
    }

    async fn playlist_detail(
        &self,
        gql: &async_graphql::Context<'_>,
        playlist_id: String,
        offset: Option<i32>,
    ) -> async_graphql::Result<SpecificPlaylistData> {
        let ctx = app(gql)?;
        let offset = page_offset(offset).map_err(gql_err)?;
        let detail = spotify::fetch_playlist_detail(ctx, &playlist_id, offset)
            .await
            .map_err(gql_err)?;
        Ok(SpecificPlaylistData {
            success: true,
            playlist: detail.playlist,
            tracks: detail.tracks,
            last_page: detail.last_page,
        })
    }

    /// Where to send the signed-in user to connect their spotify account
    async fn auth_link(&self, gql: &async_graphql::Context<'_>) -> async_graphql::Result<AuthLink> {
        let ctx = app(gql)?;
        let viewer = viewer(gql)?;
        let href = oauth::build_authorize_url(ctx, viewer.account.id)
            .await
            .map_err(gql_err)?;
        Ok(AuthLink {
            success: true,
            href,
        })
    }

    async fn who_am_i(&self, gql: &async_graphql::Context<'_>) -> async_graphql::Result<UserNode> {
        let viewer = viewer(gql)?;
        Ok(UserNode {
            account: viewer.account.clone(),
        })
    }

    async fn users(&self, gql: &async_graphql::Context<'_>) -> async_graphql::Result<Vec<UserNode>> {
        let ctx = app(gql)?;
        viewer(gql)?;
        let accounts = ctx.store.accounts().await.map_err(gql_err)?;
        Ok(accounts
            .into_iter()
            .map(|account| UserNode { account })
            .collect())
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn create_user(
        &self,
        gql: &async_graphql::Context<'_>,
        username: Option<String>,
        password: Option<String>,
        email: Option<String>,
    ) -> async_graphql::Result<AccountResult> {
        let ctx = app(gql)?;
        AccountResult::from_outcome(
            accounts::register(
                ctx,
                username.as_deref(),
                password.as_deref(),
                email.as_deref(),
            )
            .await,
        )
    }

    async fn login_user(
        &self,
        gql: &async_graphql::Context<'_>,
        username: Option<String>,
        password: Option<String>,
    ) -> async_graphql::Result<AccountResult> {
        let ctx = app(gql)?;
        AccountResult::from_outcome(
            accounts::login(ctx, username.as_deref(), password.as_deref()).await,
        )
    }

    async fn logout_user(&self, gql: &async_graphql::Context<'_>) -> async_graphql::Result<AccountResult> {
        let ctx = app(gql)?;
        let details = accounts::logout(ctx, gql.data_opt::<Viewer>())
            .await
            .map_err(gql_err)?;
        Ok(AccountResult {
            success: true,
            token: None,
            refresh_token: None,
            details,
        })
    }

    /// Trade a refresh token for a new token pair
    async fn refresh_session(
        &self,
        gql: &async_graphql::Context<'_>,
        refresh_token: String,
    ) -> async_graphql::Result<AccountResult> {
        let ctx = app(gql)?;
        AccountResult::from_outcome(accounts::refresh_session(ctx, &refresh_token).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use async_graphql::Request;
    use serde_json::json;

    async fn run(schema: &MusikSchema, query: &str, viewer: Option<Viewer>) -> serde_json::Value {
        let mut req = Request::new(query);
        if let Some(v) = viewer {
            req = req.data(v);
        }
        let resp = schema.execute(req).await;
        serde_json::to_value(&resp).unwrap()
    }

    async fn signed_up(app: &testing::TestApp) -> Viewer {
        let granted = accounts::register(&app.ctx, Some("foo"), Some("my_foo_password"), Some("foo@bar.com"))
            .await
            .unwrap();
        accounts::authenticate(&app.ctx, &granted.session.token)
            .await
            .unwrap()
            .unwrap()
    }

    #[async_std::test]
    async fn login_with_wrong_password() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        signed_up(&app).await;

        let resp = run(
            &schema,
            r#"mutation { loginUser(username: "foo", password: "wrong") { success token refreshToken details } }"#,
            None,
        )
        .await;
        assert_eq!(
            resp["data"]["loginUser"],
            json!({
                "success": false,
                "token": null,
                "refreshToken": null,
                "details": "Error in either password or username !"
            })
        );

        let resp = run(
            &schema,
            r#"mutation { loginUser(username: "foo", password: "my_foo_password") { success token refreshToken details } }"#,
            None,
        )
        .await;
        let login = &resp["data"]["loginUser"];
        assert_eq!(login["success"], json!(true));
        assert!(login["token"].is_string());
        assert!(login["refreshToken"].is_string());
        assert_eq!(login["details"], json!("User foo logged in !"));
    }

    #[async_std::test]
    async fn create_user_reports_failures_as_results() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        let resp = run(
            &schema,
            r#"mutation { createUser(username: "foo") { success token details } }"#,
            None,
        )
        .await;
        assert_eq!(
            resp["data"]["createUser"],
            json!({"success": false, "token": null, "details": "Input malformed !"})
        );

        let create = r#"mutation { createUser(username: "foo", password: "pw", email: "test@user.com") { success details } }"#;
        let resp = run(&schema, create, None).await;
        assert_eq!(
            resp["data"]["createUser"],
            json!({"success": true, "details": "User foo created successfully !"})
        );
        let resp = run(&schema, create, None).await;
        assert_eq!(
            resp["data"]["createUser"],
            json!({"success": false, "details": "User already exist !"})
        );
    }

    #[async_std::test]
    async fn guarded_queries_need_a_viewer() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        for query in &[
            "{ whoAmI { username } }",
            "{ users { username } }",
            "{ authLink { href } }",
            "{ userPlaylists(offset: 0) { success } }",
        ] {
            let resp = run(&schema, query, None).await;
            assert_eq!(
                resp["errors"][0]["message"],
                json!(AUTH_REQUIRED),
                "query {}",
                query
            );
        }
    }

    #[async_std::test]
    async fn who_am_i_reports_spotify_state() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        let viewer = signed_up(&app).await;

        let query = "{ whoAmI { username acceptedAccount hasSpotifyToken isAccessTokenExpired } }";
        let resp = run(&schema, query, Some(viewer.clone())).await;
        assert_eq!(
            resp["data"]["whoAmI"],
            json!({
                "username": "foo",
                "acceptedAccount": false,
                "hasSpotifyToken": false,
                "isAccessTokenExpired": true
            })
        );

        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600}"#,
        );
        oauth::handle_callback(
            &app.ctx,
            oauth::CallbackParams {
                code: Some("c".into()),
                state: Some(viewer.account.id.to_string()),
                error: None,
            },
        )
        .await
        .unwrap();
        let resp = run(&schema, query, Some(viewer)).await;
        assert_eq!(resp["data"]["whoAmI"]["hasSpotifyToken"], json!(true));
        assert_eq!(resp["data"]["whoAmI"]["isAccessTokenExpired"], json!(false));
    }

    #[async_std::test]
    async fn user_playlists_rejects_unaccepted_accounts() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        let viewer = signed_up(&app).await;
        let resp = run(
            &schema,
            "{ userPlaylists(offset: 0) { success details owner { id } playlists { id } lastPage } }",
            Some(viewer),
        )
        .await;
        assert_eq!(
            resp["data"]["userPlaylists"],
            json!({
                "success": false,
                "details": "Account not accepted.",
                "owner": null,
                "playlists": [],
                "lastPage": true
            })
        );
    }

    #[async_std::test]
    async fn suggestions_page() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        app.http.respond(
            "/api/token",
            200,
            r#"{"access_token":"cat","expires_in":3600}"#,
        );
        app.http.respond(
            "/playlists/p1/tracks",
            200,
            &json!({
                "items": [{"track": {
                    "id": "t1",
                    "name": "Song (Remix) - Live",
                    "duration_ms": 1,
                    "artists": [{"name": "A"}],
                    "external_urls": {"spotify": "https://open.spotify.com/track/t1"},
                    "album": {"images": []},
                    "preview_url": "https://p.scdn.co/t1"
                }}],
                "next": null
            })
            .to_string(),
        );
        let resp = run(
            &schema,
            r#"{ myPlaylistSuggestions(playlistId: "p1", offset: 0) { success lastPage tracks { id title artist cover preview } } }"#,
            None,
        )
        .await;
        assert_eq!(
            resp["data"]["myPlaylistSuggestions"],
            json!({
                "success": true,
                "lastPage": true,
                "tracks": [{
                    "id": "t1",
                    "title": "Song ",
                    "artist": "A",
                    "cover": null,
                    "preview": "https://p.scdn.co/t1"
                }]
            })
        );
    }

    #[async_std::test]
    async fn negative_offset_is_rejected() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        let resp = run(
            &schema,
            r#"{ playlistDetail(playlistId: "p1", offset: -1) { success } }"#,
            None,
        )
        .await;
        assert!(resp["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("offset"));
        assert!(app.http.requests().is_empty());
    }

    #[async_std::test]
    async fn logout_and_refresh() {
        let app = testing::app();
        let schema = build(app.ctx.clone());
        let granted = accounts::register(&app.ctx, Some("foo"), Some("pw"), None)
            .await
            .unwrap();

        let query = format!(
            r#"mutation {{ refreshSession(refreshToken: "{}") {{ success token refreshToken }} }}"#,
            granted.session.refresh_token
        );
        let resp = run(&schema, &query, None).await;
        let token = resp["data"]["refreshSession"]["token"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(resp["data"]["refreshSession"]["success"], json!(true));

        let viewer = accounts::authenticate(&app.ctx, &token).await.unwrap().unwrap();
        let resp = run(
            &schema,
            "mutation { logoutUser { success details } }",
            Some(viewer),
        )
        .await;
        assert_eq!(
            resp["data"]["logoutUser"],
            json!({"success": true, "details": "User logged out!"})
        );
        assert!(accounts::authenticate(&app.ctx, &token).await.unwrap().is_none());

        let resp = run(&schema, &query, None).await;
        assert_eq!(resp["data"]["refreshSession"]["success"], json!(false));
    }
}
