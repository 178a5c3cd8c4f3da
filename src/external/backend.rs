use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    api::{DriverStatusAPI, RideAPI, API},
    entities::{ActiveRide, CompletedRideSummary, RideRecord, RiderSummary, VehicleTypeSummary},
    error::{confirmation_rejected_error, invalid_otp_error, upstream_error, Error},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ActiveRideResponse {
    ride: Option<RideRecord>,
    #[serde(default)]
    rider: Option<RiderSummary>,
    #[serde(default)]
    vehicle_type: Option<VehicleTypeSummary>,
}

#[derive(Clone, Debug, Serialize)]
struct OtpParams<'a> {
    otp: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct RatingParams<'a> {
    rating: u8,
    comment: Option<&'a str>,
}

/// REST client for the driver endpoints. Every request carries the session
/// token as a bearer credential.
#[derive(Clone, Debug)]
pub struct HttpRideAPI {
    client: Client,
    base: String,
    token: String,
}

impl HttpRideAPI {
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn ride_url(&self, ride_id: &str, action: &str) -> String {
        self.url(&format!("/drivers/rides/{}/{}", ride_id, action))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, Error> {
        let res = request.bearer_auth(&self.token).send().await?;

        ensure_success(res).await
    }
}

async fn ensure_success(res: Response) -> Result<Response, Error> {
    let status_code = res.status().as_u16();

    if (200..300).contains(&status_code) {
        return Ok(res);
    }

    let detail = rejection_detail(res).await;

    tracing::warn!("backend rejected request with {}: {:?}", status_code, detail);

    Err(confirmation_rejected_error(status_code, detail))
}

async fn rejection_detail(res: Response) -> Option<String> {
    let body: Value = res.json().await.ok()?;

    match body.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl RideAPI for HttpRideAPI {
    #[tracing::instrument(skip(self))]
    async fn accept_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.send(self.client.post(self.ride_url(ride_id, "accept")))
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn decline_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.send(self.client.post(self.ride_url(ride_id, "decline")))
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn arrive_at_pickup(&self, ride_id: &str) -> Result<(), Error> {
        self.send(self.client.post(self.ride_url(ride_id, "arrive")))
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, otp))]
    async fn verify_otp(&self, ride_id: &str, otp: &str) -> Result<(), Error> {
        let request = self
            .client
            .post(self.ride_url(ride_id, "verify-otp"))
            .json(&OtpParams { otp })
            .bearer_auth(&self.token);

        let res = request.send().await?;

        if res.status().as_u16() == 400 {
            return Err(invalid_otp_error());
        }

        ensure_success(res).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn start_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.send(self.client.post(self.ride_url(ride_id, "start")))
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(&self, ride_id: &str) -> Result<CompletedRideSummary, Error> {
        let res = self
            .send(self.client.post(self.ride_url(ride_id, "complete")))
            .await?;

        let body: Value = res.json().await?;

        if body.is_null() {
            return Err(upstream_error());
        }

        Ok(serde_json::from_value(body)?)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(&self, ride_id: &str, reason: Option<&str>) -> Result<(), Error> {
        let request = self
            .client
            .post(self.ride_url(ride_id, "cancel"))
            .query(&[("reason", reason.unwrap_or(""))]);

        self.send(request).await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_active_ride(&self) -> Result<Option<ActiveRide>, Error> {
        let res = self
            .send(self.client.get(self.url("/drivers/rides/active")))
            .await?;

        let data: ActiveRideResponse = res.json().await?;

        Ok(data.ride.map(|ride| ActiveRide {
            ride,
            rider: data.rider,
            vehicle_type: data.vehicle_type,
        }))
    }

    #[tracing::instrument(skip(self, comment))]
    async fn rate_rider(
        &self,
        ride_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<(), Error> {
        let request = self
            .client
            .post(self.ride_url(ride_id, "rate-rider"))
            .json(&RatingParams { rating, comment });

        self.send(request).await?;

        Ok(())
    }
}

#[async_trait]
impl DriverStatusAPI for HttpRideAPI {
    #[tracing::instrument(skip(self))]
    async fn update_online_status(&self, driver_id: &str, is_online: bool) -> Result<(), Error> {
        let request = self
            .client
            .put(self.url(&format!("/drivers/{}/status", driver_id)))
            .query(&[("is_online", is_online)]);

        self.send(request).await?;

        Ok(())
    }
}

impl API for HttpRideAPI {}
