/// Model specifications of the three result tables
///
/// Every model regresses the log growth of exports (`d_ln_exports`) on a
/// disaster measure and population growth, absorbing product×country and
/// product×year fixed effects, with standard errors clustered by country.
///
/// - Table 1: each disaster measure, all products.
/// - Table 2: each measure, agricultural vs non-agricultural products.
/// - Table 3: each measure interacted with poor and small country flags.
///
/// Under the "significant" criterion the occurrence measure counts only
/// events in the top decile of deaths per inhabitant.

use crate::analysis::frame::Frame;
use crate::analysis::panel::{
    COL_CMD_CODE, COL_D_LN_EXPORTS, COL_D_LN_POPULATION, COL_DISASTER_INDEX, COL_IS_AGRI, COL_IS_POOR,
    COL_IS_SMALL, COL_ISO, COL_LN_SIG_OCCURRENCE, COL_LN_TOTAL_DEATHS, COL_LN_TOTAL_OCCURRENCE, COL_YEAR,
};
use crate::analysis::regression::{self, ModelData, RegressionResult};
use crate::logging::{self, DataSource};
use crate::model::{Period, Result};
use std::fmt;

pub const TABLE_NUMBERS: [u8; 3] = [1, 2, 3];

pub const FE_PRODUCT_COUNTRY: &str = "Product × Country";
pub const FE_PRODUCT_YEAR: &str = "Product × Year";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    All,
    Significant,
}

impl Criterion {
    pub const ALL: [Criterion; 2] = [Criterion::All, Criterion::Significant];

    pub fn label(&self) -> &'static str {
        match self {
            Criterion::All => "all",
            Criterion::Significant => "significant",
        }
    }

    pub fn occurrence_measure(&self) -> &'static str {
        match self {
            Criterion::All => COL_LN_TOTAL_OCCURRENCE,
            Criterion::Significant => COL_LN_SIG_OCCURRENCE,
        }
    }

    /// Measures in table column order.
    pub fn measures(&self) -> [&'static str; 3] {
        [self.occurrence_measure(), COL_LN_TOTAL_DEATHS, COL_DISASTER_INDEX]
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    AllProducts,
    Agricultural,
    NonAgricultural,
}

impl Sample {
    pub fn label(&self) -> &'static str {
        match self {
            Sample::AllProducts => "All",
            Sample::Agricultural => "Agri",
            Sample::NonAgricultural => "Non-agri",
        }
    }

    fn includes(&self, is_agri: f64) -> bool {
        match self {
            Sample::AllProducts => true,
            Sample::Agricultural => is_agri == 1.0,
            Sample::NonAgricultural => is_agri == 0.0,
        }
    }
}

/// One column of a result table.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub table: u8,
    pub measure: &'static str,
    pub sample: Sample,
    /// Flags interacted with the measure.
    pub interactions: Vec<&'static str>,
}

pub fn interaction_name(measure: &str, flag: &str) -> String {
    format!("{}:{}", measure, flag)
}

impl ModelSpec {
    pub fn regressor_names(&self) -> Vec<String> {
        let mut names = vec![self.measure.to_string()];
        names.extend(self.interactions.iter().map(|f| interaction_name(self.measure, f)));
        names.push(COL_D_LN_POPULATION.to_string());
        names
    }
}

pub fn table_specs(table: u8, criterion: Criterion) -> Vec<ModelSpec> {
    let measures = criterion.measures();
    match table {
        1 => measures
            .into_iter()
            .map(|m| ModelSpec {
                table,
                measure: m,
                sample: Sample::AllProducts,
                interactions: Vec::new(),
            })
            .collect(),
        2 => measures
            .into_iter()
            .flat_map(|m| {
                [Sample::Agricultural, Sample::NonAgricultural].map(|sample| ModelSpec {
                    table,
                    measure: m,
                    sample,
                    interactions: Vec::new(),
                })
            })
            .collect(),
        3 => measures
            .into_iter()
            .map(|m| ModelSpec {
                table,
                measure: m,
                sample: Sample::AllProducts,
                interactions: vec![COL_IS_POOR, COL_IS_SMALL],
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Columns a dataset needs for every model of the methodology.
pub fn required_columns(criterion: Criterion) -> Vec<&'static str> {
    let mut columns = vec![
        COL_D_LN_EXPORTS,
        COL_D_LN_POPULATION,
        COL_ISO,
        COL_CMD_CODE,
        COL_YEAR,
        COL_IS_AGRI,
        COL_IS_POOR,
        COL_IS_SMALL,
        COL_LN_TOTAL_DEATHS,
    ];
    columns.push(criterion.occurrence_measure());
    columns
}

/// Variables shared by every model of a dataset, read once.
pub struct PreparedData {
    pub y: Vec<f64>,
    pub population: Vec<f64>,
    pub is_agri: Vec<f64>,
    pub is_poor: Vec<f64>,
    pub is_small: Vec<f64>,
    pub product_country: Vec<String>,
    pub product_year: Vec<String>,
    pub country: Vec<String>,
}

impl PreparedData {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Ok(Self {
            y: frame.numeric(COL_D_LN_EXPORTS)?,
            population: frame.numeric(COL_D_LN_POPULATION)?,
            is_agri: frame.numeric(COL_IS_AGRI)?,
            is_poor: frame.numeric(COL_IS_POOR)?,
            is_small: frame.numeric(COL_IS_SMALL)?,
            product_country: frame.keys(&[COL_CMD_CODE, COL_ISO])?,
            product_year: frame.keys(&[COL_CMD_CODE, COL_YEAR])?,
            country: frame.text(COL_ISO)?,
        })
    }

    fn flag(&self, name: &str) -> &[f64] {
        if name == COL_IS_POOR { &self.is_poor } else { &self.is_small }
    }

    /// Model inputs for `spec` restricted to its product sample.
    pub fn model_data(&self, spec: &ModelSpec, measure: &[f64]) -> ModelData {
        let rows: Vec<usize> = (0..self.y.len())
            .filter(|&i| spec.sample.includes(self.is_agri[i]))
            .collect();
        let pick = |values: &[f64]| rows.iter().map(|&i| values[i]).collect::<Vec<f64>>();
        let pick_keys = |values: &[String]| rows.iter().map(|&i| values[i].clone()).collect::<Vec<String>>();

        let mut regressors = vec![(spec.measure.to_string(), pick(measure))];
        for flag in &spec.interactions {
            let values = self.flag(flag);
            regressors.push((
                interaction_name(spec.measure, flag),
                rows.iter().map(|&i| measure[i] * values[i]).collect(),
            ));
        }
        regressors.push((COL_D_LN_POPULATION.to_string(), pick(&self.population)));

        ModelData {
            dependent: COL_D_LN_EXPORTS.to_string(),
            y: pick(&self.y),
            regressors,
            effects: vec![
                (FE_PRODUCT_COUNTRY.to_string(), pick_keys(&self.product_country)),
                (FE_PRODUCT_YEAR.to_string(), pick_keys(&self.product_year)),
            ],
            clusters: Some(pick_keys(&self.country)),
        }
    }
}

/// Estimated column of a result table.
#[derive(Debug, Clone)]
pub struct ColumnResult {
    pub spec: ModelSpec,
    pub result: RegressionResult,
}

#[derive(Debug, Clone)]
pub struct TableResult {
    pub number: u8,
    pub period: Period,
    pub criterion: Criterion,
    pub columns: Vec<ColumnResult>,
}

/// Estimates every column of one table. Columns that cannot be estimated
/// (measure absent, singular design) are logged and left out.
pub fn estimate_table(
    frame: &Frame,
    data: &PreparedData,
    period: Period,
    criterion: Criterion,
    table: u8,
) -> TableResult {
    let context = format!("{} T{} {}", period, table, criterion);
    let mut columns = Vec::new();
    for spec in table_specs(table, criterion) {
        if !frame.has_column(spec.measure) {
            logging::warn(
                DataSource::Regression,
                Some(&context),
                &format!("{} absent from dataset, column skipped", spec.measure),
            );
            continue;
        }
        let estimated = frame
            .numeric(spec.measure)
            .and_then(|measure| regression::fit(&data.model_data(&spec, &measure)));
        match estimated {
            Ok(result) => {
                logging::debug(
                    DataSource::Regression,
                    Some(&context),
                    &format!(
                        "{} [{}]: N={}, R2 within={:.4}",
                        spec.measure,
                        spec.sample.label(),
                        result.n_obs,
                        result.r2_within
                    ),
                );
                columns.push(ColumnResult { spec, result });
            }
            Err(err) => logging::warn(
                DataSource::Regression,
                Some(&context),
                &format!("{} [{}] not estimated: {}", spec.measure, spec.sample.label(), err),
            ),
        }
    }
    TableResult {
        number: table,
        period,
        criterion,
        columns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    #[test]
    fn test_table_layouts() {
        let t1 = table_specs(1, Criterion::All);
        assert_eq!(
            t1.iter().map(|s| s.measure).collect::<Vec<_>>(),
            vec!["ln_total_occurrence", "ln_total_deaths", "disaster_index"]
        );
        let t2 = table_specs(2, Criterion::All);
        assert_eq!(t2.len(), 6);
        assert_eq!(t2[0].sample, Sample::Agricultural);
        assert_eq!(t2[1].sample, Sample::NonAgricultural);
        let t3 = table_specs(3, Criterion::Significant);
        assert_eq!(t3[0].measure, "ln_sig_occurrence");
        assert_eq!(
            t3[0].regressor_names(),
            vec![
                "ln_sig_occurrence",
                "ln_sig_occurrence:is_poor_country",
                "ln_sig_occurrence:is_small_country",
                "d_ln_population"
            ]
        );
        assert!(table_specs(4, Criterion::All).is_empty());
    }

    #[test]
    fn test_model_data_restricts_sample_and_builds_interactions() {
        let frame = Frame::from_table(
            Table::parse(
                "Year,ISO,cmdCode,is_agri,is_poor_country,is_small_country,d_ln_exports,d_ln_population,ln_total_occurrence\n\
                 1990,AAA,01,True,1,0,0.1,0.01,2.0\n\
                 1990,AAA,84,False,1,0,0.2,0.01,2.0\n\
                 1991,BBB,01,True,0,1,0.3,0.02,3.0\n",
            )
            .unwrap(),
        );
        let data = PreparedData::from_frame(&frame).unwrap();
        let measure = frame.numeric("ln_total_occurrence").unwrap();

        let agri = ModelSpec {
            table: 3,
            measure: "ln_total_occurrence",
            sample: Sample::Agricultural,
            interactions: vec![COL_IS_POOR, COL_IS_SMALL],
        };
        let model = data.model_data(&agri, &measure);
        assert_eq!(model.y, vec![0.1, 0.3]);
        assert_eq!(model.regressors[1].1, vec![2.0, 0.0]);
        assert_eq!(model.regressors[2].1, vec![0.0, 3.0]);
        assert_eq!(model.effects[0].1, vec!["01|AAA", "01|BBB"]);
        assert_eq!(model.effects[1].1, vec!["01|1990", "01|1991"]);
        assert_eq!(model.clusters, Some(vec!["AAA".to_string(), "BBB".to_string()]));
    }

    #[test]
    fn test_missing_measure_column_is_skipped() {
        let frame = Frame::from_table(
            Table::parse(
                "Year,ISO,cmdCode,is_agri,is_poor_country,is_small_country,d_ln_exports,d_ln_population\n\
                 1990,AAA,01,True,1,0,0.1,0.01\n",
            )
            .unwrap(),
        );
        let data = PreparedData::from_frame(&frame).unwrap();
        let table = estimate_table(&frame, &data, Period::new(1990, 1991), Criterion::All, 1);
        assert!(table.columns.is_empty());
    }
}
