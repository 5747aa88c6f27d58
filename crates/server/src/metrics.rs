#![cfg(feature = "metrics")]

use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsContext {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub gateway_rejections_total: IntCounterVec,
}

impl MetricsContext {
    pub fn init() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "ch4tgate_http_requests_total",
                "Number of HTTP responses served, labeled by route and status",
            ),
            &["route", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let gateway_rejections_total = IntCounterVec::new(
            Opts::new(
                "ch4tgate_gateway_rejections_total",
                "Writes refused or purged by the admission engine, labeled by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(gateway_rejections_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            gateway_rejections_total,
        }))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
