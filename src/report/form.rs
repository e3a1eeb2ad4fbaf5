use crate::config::Account;
use crate::window::{ReportWindow, WindowLabel};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Datelike;
use rand::Rng;
use serde_json::{json, Value};

/// Portal entry page; GET redirects through to the SSO login form.
pub const DEFAULT_PAGE_URL: &str = "https://selfreport.shu.edu.cn/Default.aspx";

/// Fixed OAuth authorize endpoint. GET once after posting credentials to
/// finish the cookie handshake; the response body is discarded.
pub const SSO_AUTHORIZE_URL: &str = "https://newsso.shu.edu.cn/oauth/authorize?response_type=code&client_id=WUHWfrntnWYHZfzQ5QvXUCVy&redirect_uri=https%3a%2f%2fselfreport.shu.edu.cn%2fLoginSSO.aspx%3fReturnUrl%3d%252fDefault.aspx&scope=1";

const REPORT_PAGE_URL: &str = "https://selfreport.shu.edu.cn/XueSFX/HalfdayReport.aspx";

/// Anti-forgery token field scraped from the form page and round-tripped
/// verbatim in the POST.
pub const VIEW_STATE_FIELD: &str = "__VIEWSTATE";

/// Generator tag matched to the portal's current form version.
const VIEW_STATE_GENERATOR: &str = "DC4D08A3";

/// Substring the portal answers with when a submission is accepted.
pub const SUCCESS_MARKER: &str = "提交成功";

const PROVINCES: &[&str] = &[
    "北京", "天津", "上海", "重庆", "河北", "山西", "辽宁", "吉林", "黑龙江", "江苏", "浙江",
    "安徽", "福建", "江西", "山东", "河南", "湖北", "湖南", "广东", "海南", "四川", "贵州",
    "云南", "陕西", "甘肃", "青海", "内蒙古", "广西", "西藏", "宁夏", "新疆", "香港", "澳门",
    "台湾",
];

const SHANGHAI_DISTRICTS: &[&str] = &[
    "黄浦区", "卢湾区", "徐汇区", "长宁区", "静安区", "普陀区", "虹口区", "杨浦区", "宝山区",
    "闵行区", "嘉定区", "松江区", "金山区", "青浦区", "奉贤区", "浦东新区", "崇明区",
];

const RISK_AREA_NOTE: &str = "（天津东疆港区瞰海轩小区、天津汉沽街、天津中心渔港冷链物流区A区和B区、浦东营前村、安徽省阜阳市颍上县慎城镇张洋小区、浦东周浦镇明天华城小区、浦东祝桥镇新生小区、内蒙古满洲里东山街道办事处、内蒙古满洲里北区街道）";

/// Form page and submission URL for one half-day window. The portal wants
/// unpadded date components here, unlike the padded date inside the form.
pub fn report_page_url(window: &ReportWindow) -> String {
    format!(
        "{REPORT_PAGE_URL}?day={}-{}-{}&t={}",
        window.date.year(),
        window.date.month(),
        window.date.day(),
        window.slot.query_value()
    )
}

/// Uniform jitter of ±0.2 around the baseline, rendered the way the form
/// field expects it: exactly one decimal place.
pub fn jittered_temperature(baseline: f64, rng: &mut impl Rng) -> String {
    let sampled = rng.random_range(baseline - 0.2..=baseline + 0.2);
    format!("{sampled:.1}")
}

/// Declarative record of one submission: every value the final POST
/// carries. A portal schema change should only ever touch this file.
#[derive(Debug, Clone)]
pub struct ReportForm {
    date: String,
    temperature: String,
    campus: String,
    county: String,
    address: String,
    title: String,
    view_state: String,
}

impl ReportForm {
    pub fn new(
        account: &Account,
        window: &ReportWindow,
        view_state: String,
        temperature: String,
    ) -> Self {
        ReportForm {
            date: window.date.format("%Y-%m-%d").to_string(),
            temperature,
            campus: account.campus.clone(),
            county: account.county.clone(),
            address: account.address.clone(),
            title: report_title(window.label),
            view_state,
        }
    }

    /// The flat WebForms fields, exactly as the portal's frontend posts
    /// them: all-clear health answers plus the account profile.
    pub fn fields(&self) -> Vec<(String, String)> {
        let field = |name: &str, value: &str| (name.to_string(), value.to_string());
        vec![
            field("__EVENTTARGET", "p1$ctl00$btnSubmit"),
            field("__EVENTARGUMENT", ""),
            field(VIEW_STATE_FIELD, &self.view_state),
            field("__VIEWSTATEGENERATOR", VIEW_STATE_GENERATOR),
            field("p1$ChengNuo", "p1_ChengNuo"),
            field("p1$BaoSRQ", &self.date),
            field("p1$DangQSTZK", "良好"),
            field("p1$TiWen", &self.temperature),
            field("p1$ZaiXiao", &self.campus),
            field("p1$ddlSheng$Value", "上海"),
            field("p1$ddlSheng", "上海"),
            field("p1$ddlShi$Value", "上海市"),
            field("p1$ddlShi", "上海市"),
            field("p1$ddlXian$Value", &self.county),
            field("p1$ddlXian", &self.county),
            field("p1$FengXDQDL", "否"),
            field("p1$TongZWDLH", "否"),
            field("p1$XiangXDZ", &self.address),
            field("p1$QueZHZJC$Value", "否"),
            field("p1$QueZHZJC", "否"),
            field("p1$DangRGL", "否"),
            field("p1$GeLDZ", ""),
            field("p1$CengFWH", "否"),
            field("p1$CengFWH_RiQi", ""),
            field("p1$CengFWH_BeiZhu", ""),
            field("p1$JieChu", "否"),
            field("p1$JieChu_RiQi", ""),
            field("p1$JieChu_BeiZhu", ""),
            field("p1$TuJWH", "否"),
            field("p1$TuJWH_RiQi", ""),
            field("p1$TuJWH_BeiZhu", ""),
            field("p1$JiaRen_BeiZhu", ""),
            field("p1$SuiSM", "绿色"),
            field("p1$LvMa14Days", "是"),
            field("p1$Address2", ""),
            field("F_TARGET", "p1_ctl00_btnSubmit"),
            field("p1_GeLSM_Collapsed", "false"),
            field("p1_Collapsed", "false"),
            field("F_STATE", &self.f_state()),
        ]
    }

    /// FineUI control-state document: the JSON the portal frontend
    /// serializes back on submit, base64 on the wire. Carries the same
    /// values as the flat fields plus the half-day title.
    fn f_state(&self) -> String {
        let state = json!({
            "p1_BaoSRQ": { "Text": self.date },
            "p1_DangQSTZK": {
                "F_Items": [["良好", "良好", 1], ["不适", "不适", 1]],
                "SelectedValue": "良好"
            },
            "p1_ZhengZhuang": {
                "Hidden": true,
                "F_Items": [["感冒", "感冒", 1], ["咳嗽", "咳嗽", 1], ["发热", "发热", 1]],
                "SelectedValueArray": []
            },
            "p1_TiWen": { "Text": self.temperature },
            "p1_ZaiXiao": {
                "SelectedValue": self.campus,
                "F_Items": [
                    ["不在校", "不在校", 1],
                    ["宝山", "宝山校区", 1],
                    ["延长", "延长校区", 1],
                    ["嘉定", "嘉定校区", 1],
                    ["新闸路", "新闸路校区", 1]
                ]
            },
            "p1_ddlSheng": {
                "F_Items": dropdown_items("选择省份", PROVINCES),
                "SelectedValueArray": ["上海"]
            },
            "p1_ddlShi": {
                "Enabled": true,
                "F_Items": dropdown_items("选择市", &["上海市"]),
                "SelectedValueArray": ["上海市"]
            },
            "p1_ddlXian": {
                "Enabled": true,
                "F_Items": dropdown_items("选择县区", SHANGHAI_DISTRICTS),
                "SelectedValueArray": [self.county]
            },
            "p1_FengXDQDL": { "SelectedValue": "否", "F_Items": yes_no_items() },
            "p1_TongZWDLH": { "SelectedValue": "否", "F_Items": yes_no_items() },
            "p1_XiangXDZ": { "Text": self.address },
            "p1_QueZHZJC": {
                "F_Items": [["是", "是", 1, "", ""], ["否", "否", 1, "", ""]],
                "SelectedValueArray": ["否"]
            },
            "p1_DangRGL": { "SelectedValue": "否", "F_Items": yes_no_items() },
            "p1_GeLSM": { "Hidden": true, "IFrameAttributes": {} },
            "p1_GeLFS": {
                "Required": false,
                "Hidden": true,
                "F_Items": [["居家隔离", "居家隔离", 1], ["集中隔离", "集中隔离", 1]],
                "SelectedValue": null
            },
            "p1_GeLDZ": { "Hidden": true },
            "p1_CengFWH": {
                "Label": risk_label("2020年9月27日后是否在中高风险地区逗留过"),
                "F_Items": yes_no_items(),
                "SelectedValue": "否"
            },
            "p1_CengFWH_RiQi": { "Hidden": true },
            "p1_CengFWH_BeiZhu": { "Hidden": true },
            "p1_JieChu": {
                "Label": risk_label("11月08日至11月22日是否与来自中高风险地区发热人员密切接触"),
                "SelectedValue": "否",
                "F_Items": yes_no_items()
            },
            "p1_JieChu_RiQi": { "Hidden": true },
            "p1_JieChu_BeiZhu": { "Hidden": true },
            "p1_TuJWH": {
                "Label": risk_label("11月08日至11月22日是否乘坐公共交通途径中高风险地区"),
                "SelectedValue": "否",
                "F_Items": yes_no_items()
            },
            "p1_TuJWH_RiQi": { "Hidden": true },
            "p1_TuJWH_BeiZhu": { "Hidden": true },
            "p1_JiaRen": { "Label": "11月08日至11月22日家人是否有发热等症状" },
            "p1_JiaRen_BeiZhu": { "Hidden": true },
            "p1_SuiSM": {
                "SelectedValue": "绿色",
                "F_Items": [["红色", "红色", 1], ["黄色", "黄色", 1], ["绿色", "绿色", 1]]
            },
            "p1_LvMa14Days": { "SelectedValue": "是", "F_Items": yes_no_items() },
            "p1": { "Title": self.title, "IFrameAttributes": {} }
        });
        BASE64.encode(state.to_string())
    }
}

/// F_STATE frame title, byte-for-byte what the captured exchange carries:
/// the half-day name nested inside a second 每日两报（）wrapper.
fn report_title(label: WindowLabel) -> String {
    match label {
        WindowLabel::Morning => "每日两报（每日两报（上午））".to_string(),
        WindowLabel::Evening => "每日两报（每日两报（下午））".to_string(),
    }
}

fn yes_no_items() -> Value {
    json!([["是", "是", 1], ["否", "否", 1]])
}

fn dropdown_items(placeholder: &str, options: &[&str]) -> Value {
    let mut items = vec![json!(["-1", placeholder, 1, "", ""])];
    items.extend(options.iter().map(|name| json!([name, name, 1, "", ""])));
    Value::Array(items)
}

fn risk_label(question: &str) -> String {
    format!("{question}<span style='color:red;'>{RISK_AREA_NOTE}</span>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{ReportSlot, ReportWindow};
    use chrono::NaiveDate;

    fn account() -> Account {
        Account {
            id: "21800001".to_string(),
            password: "secret".to_string(),
            campus: "宝山".to_string(),
            county: "宝山区".to_string(),
            address: "上大路99号".to_string(),
            email_to: "a@example.edu".to_string(),
        }
    }

    fn window(slot: ReportSlot, label: WindowLabel) -> ReportWindow {
        ReportWindow {
            date: NaiveDate::from_ymd_opt(2022, 3, 5).expect("valid date"),
            slot,
            label,
        }
    }

    fn value_of<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
        fields
            .iter()
            .find(|(field, _)| field.as_str() == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_else(|| panic!("field {name} missing"))
    }

    #[test]
    fn url_uses_unpadded_date_and_slot() {
        let url = report_page_url(&window(ReportSlot::First, WindowLabel::Morning));
        assert_eq!(
            url,
            "https://selfreport.shu.edu.cn/XueSFX/HalfdayReport.aspx?day=2022-3-5&t=1"
        );

        let url = report_page_url(&window(ReportSlot::Second, WindowLabel::Evening));
        assert!(url.ends_with("&t=2"));
    }

    #[test]
    fn fields_round_trip_the_token_and_pad_the_date() {
        let form = ReportForm::new(
            &account(),
            &window(ReportSlot::First, WindowLabel::Morning),
            "token-123".to_string(),
            "36.6".to_string(),
        );
        let fields = form.fields();

        assert_eq!(value_of(&fields, "__VIEWSTATE"), "token-123");
        assert_eq!(value_of(&fields, "__VIEWSTATEGENERATOR"), "DC4D08A3");
        assert_eq!(value_of(&fields, "p1$BaoSRQ"), "2022-03-05");
        assert_eq!(value_of(&fields, "p1$TiWen"), "36.6");
        assert_eq!(value_of(&fields, "p1$ZaiXiao"), "宝山");
        assert_eq!(value_of(&fields, "p1$ddlXian"), "宝山区");
        assert_eq!(value_of(&fields, "p1$SuiSM"), "绿色");
        assert_eq!(value_of(&fields, "__EVENTTARGET"), "p1$ctl00$btnSubmit");
    }

    #[test]
    fn control_state_carries_the_same_values_as_the_flat_fields() {
        let form = ReportForm::new(
            &account(),
            &window(ReportSlot::Second, WindowLabel::Evening),
            "token".to_string(),
            "36.4".to_string(),
        );
        let fields = form.fields();

        let decoded = BASE64
            .decode(value_of(&fields, "F_STATE"))
            .expect("valid base64");
        let state: Value = serde_json::from_slice(&decoded).expect("valid json");

        assert_eq!(state["p1_BaoSRQ"]["Text"], "2022-03-05");
        assert_eq!(state["p1_TiWen"]["Text"], "36.4");
        assert_eq!(state["p1_ZaiXiao"]["SelectedValue"], "宝山");
        assert_eq!(state["p1_ddlXian"]["SelectedValueArray"][0], "宝山区");
        assert_eq!(state["p1_XiangXDZ"]["Text"], "上大路99号");
        assert_eq!(state["p1"]["Title"], "每日两报（每日两报（下午））");
        assert_eq!(state["p1_GeLFS"]["SelectedValue"], Value::Null);
    }

    #[test]
    fn frame_title_nests_the_half_day_name_in_a_second_wrapper() {
        let cases = [
            (
                ReportSlot::First,
                WindowLabel::Morning,
                "每日两报（每日两报（上午））",
            ),
            (
                ReportSlot::Second,
                WindowLabel::Evening,
                "每日两报（每日两报（下午））",
            ),
        ];
        for (slot, label, expected) in cases {
            let form = ReportForm::new(
                &account(),
                &window(slot, label),
                "token".to_string(),
                "36.5".to_string(),
            );
            let fields = form.fields();

            let decoded = BASE64
                .decode(value_of(&fields, "F_STATE"))
                .expect("valid base64");
            let state: Value = serde_json::from_slice(&decoded).expect("valid json");
            assert_eq!(state["p1"]["Title"], expected);
        }
    }

    #[test]
    fn jitter_stays_within_the_band_with_one_decimal() {
        let mut rng = rand::rng();
        for baseline in [35.0, 36.5, 37.2] {
            for _ in 0..500 {
                let rendered = jittered_temperature(baseline, &mut rng);
                let (_, fraction) = rendered.split_once('.').expect("decimal point present");
                assert_eq!(fraction.len(), 1, "one decimal place in {rendered}");

                let value: f64 = rendered.parse().expect("numeric temperature");
                assert!(
                    value >= baseline - 0.2 - 1e-9 && value <= baseline + 0.2 + 1e-9,
                    "{value} outside ±0.2 of {baseline}"
                );
            }
        }
    }
}
