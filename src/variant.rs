// src/variant.rs
//! Remote query setups: how one sub-batch of parameters is typed into a
//! transaction's selection screen before the background job is scheduled.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::period::ReferencePeriod;
use crate::remote::{Session, TransferChannel};
use crate::schema::{catalog, ImportSchema};

#[async_trait]
pub trait QuerySetup: Send + Sync {
    /// Transaction code started before each submission.
    fn transaction(&self) -> &str;

    /// Whether the schema's saved selection variant is loaded first.
    fn loads_variant(&self) -> bool {
        true
    }

    /// Fill the selection screen for `batch`. Errors are retried by the
    /// caller from a fresh transaction.
    async fn initialize_query(
        &self,
        session: &mut dyn Session,
        transfer: &TransferChannel,
        batch: &[String],
        period: &ReferencePeriod,
    ) -> Result<()>;
}

/// Date window of an IW67 measurement query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementScope {
    /// Measurements completed inside the reference period (`MEDE`).
    Period,
    /// Every measurement created since 2021 (`MEDL`).
    AllTime,
}

const MULTI_SELECT_CHECK: &str = "wnd[0]/usr/chkDY_QMSM";
const CODE_RANGE_BUTTON: &str = "wnd[0]/usr/btn%_MNCOD_%_APP_%-VALU_PUSH";
const DIALOG_CLEAR: &str = "wnd[1]/tbar[0]/btn[16]";
pub const DIALOG_PASTE: &str = "wnd[1]/tbar[0]/btn[24]";
const DIALOG_ACCEPT: &str = "wnd[1]/tbar[0]/btn[8]";
pub const CODE_LOW: &str = "wnd[0]/usr/ctxtMNCOD-LOW";
pub const COMPLETED_FROM: &str = "wnd[0]/usr/ctxtERLDAT-LOW";
pub const COMPLETED_TO: &str = "wnd[0]/usr/ctxtERLDAT-HIGH";
pub const CREATED_FROM: &str = "wnd[0]/usr/ctxtERDAT-LOW";
pub const CREATED_TO: &str = "wnd[0]/usr/ctxtERDAT-HIGH";

const ALL_TIME_FROM: &str = "01.01.2021";
const ALL_TIME_TO: &str = "31.12.9999";
const SCREEN_DATE: &str = "%d.%m.%Y";

/// IW67 measurements selected by measurement code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementsByCode {
    scope: MeasurementScope,
}

impl MeasurementsByCode {
    pub fn new(scope: MeasurementScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> MeasurementScope {
        self.scope
    }

    pub fn schema(&self) -> Arc<ImportSchema> {
        catalog::IW67_MEASUREMENTS.clone()
    }

    pub fn extraction_name(&self, period: &ReferencePeriod) -> String {
        match self.scope {
            MeasurementScope::Period => format!("IW67_MEDE_{}", period.name()),
            MeasurementScope::AllTime => "IW67_MEDL".to_string(),
        }
    }

    pub fn default_codes(&self) -> Vec<String> {
        let codes: &[u32] = match self.scope {
            MeasurementScope::Period => &[10, 640, 130, 310, 81, 380],
            MeasurementScope::AllTime => &[380, 30, 150, 20, 590, 113],
        };
        pad_codes(codes.iter().map(u32::to_string))
    }
}

#[async_trait]
impl QuerySetup for MeasurementsByCode {
    fn transaction(&self) -> &str {
        "IW67"
    }

    async fn initialize_query(
        &self,
        session: &mut dyn Session,
        transfer: &TransferChannel,
        batch: &[String],
        period: &ReferencePeriod,
    ) -> Result<()> {
        let Some(first) = batch.first() else {
            bail!("empty parameter batch");
        };

        session
            .set_selected(MULTI_SELECT_CHECK, self.scope == MeasurementScope::AllTime)
            .await?;
        session.press(CODE_RANGE_BUTTON).await?;
        session.press(DIALOG_CLEAR).await?;
        {
            let guard = transfer.acquire().await;
            guard.put(batch)?;
            session.press(DIALOG_PASTE).await?;
        }
        session.press(DIALOG_ACCEPT).await?;

        match self.scope {
            MeasurementScope::Period => {
                let from = period.start().format(SCREEN_DATE).to_string();
                let to = period.end().format(SCREEN_DATE).to_string();
                session.set_text(COMPLETED_FROM, &from).await?;
                session.set_text(COMPLETED_TO, &to).await?;
            }
            MeasurementScope::AllTime => {
                session.set_text(CREATED_FROM, ALL_TIME_FROM).await?;
                session.set_text(CREATED_TO, ALL_TIME_TO).await?;
            }
        }

        match session.text(CODE_LOW).await? {
            Some(low) if low == *first => Ok(()),
            other => bail!(
                "code selection not applied on {}: expected {first}, screen shows {:?}",
                session.name(),
                other
            ),
        }
    }
}

/// Zero-pad numeric codes to four digits, dropping duplicates and blanks
/// while keeping first-seen order.
pub fn pad_codes<I, S>(codes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for code in codes {
        let code = code.as_ref().trim();
        if code.is_empty() {
            continue;
        }
        let padded = format!("{code:0>4}");
        if !out.contains(&padded) {
            out.push(padded);
        }
    }
    out
}
